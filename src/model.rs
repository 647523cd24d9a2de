//! Shared data model for control configuration and the in-memory
//! representations of the reconciliation pipeline's temporary relations.
//!
//! Grounded on `signals/correlator.rs`'s `CorrelatorConfig` (a plain config
//! struct with a `Default` impl consumed by an engine struct).

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Which side of the reconciliation a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodType {
    D,
    W,
    M,
}

impl PeriodType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "D" => Some(Self::D),
            "W" => Some(Self::W),
            "M" => Some(Self::M),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationType {
    None,
    Default,
    MinMax,
    Rank,
    ZNorm,
}

impl NormalizationType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "default" => Some(Self::Default),
            "minmax" => Some(Self::MinMax),
            "rank" => Some(Self::Rank),
            "z_norm" => Some(Self::ZNorm),
            _ => None,
        }
    }

    /// Resolve `default` against a global override.
    pub fn resolve(self, global_default: NormalizationType) -> NormalizationType {
        match self {
            NormalizationType::Default => global_default,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CorrelationLimit {
    Unbounded,
    Auto,
    Fixed(u64),
}

#[derive(Debug, Clone)]
pub struct CorrelationConfigEntry {
    pub field_a: String,
    pub field_b: String,
    pub allow_null: bool,
    pub formula_mode: bool,
}

#[derive(Debug, Clone)]
pub struct DiscrepancyConfigEntry {
    pub field_a: String,
    pub field_b: String,
    pub numeric_tolerance_from: f64,
    pub numeric_tolerance_to: f64,
    pub percentage_mode: bool,
    pub formula_mode: bool,
    pub formula_alias: Option<String>,
}

impl DiscrepancyConfigEntry {
    pub fn label(&self) -> &str {
        self.formula_alias.as_deref().unwrap_or(&self.field_a)
    }
}

#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub need_issues_a: bool,
    pub need_issues_b: bool,
    pub need_recons_a: bool,
    pub need_recons_b: bool,
    pub allow_duplicates: bool,
    /// `None` inherits `GlobalConfig::fuzzy_optimization_default`.
    pub fuzzy_optimization: Option<bool>,
    /// `None` inherits `GlobalConfig::discrepancy_matching_default`.
    pub discrepancy_matching: Option<bool>,
    pub normalization_type: NormalizationType,
    pub time_shift_from: i64,
    pub time_shift_to: i64,
    pub time_tolerance_from: i64,
    pub time_tolerance_to: i64,
    pub correlation_limit: CorrelationLimit,
    pub output_limit_a: Option<usize>,
    pub output_limit_b: Option<usize>,
    pub correlation_config: Vec<CorrelationConfigEntry>,
    pub discrepancy_config: Vec<DiscrepancyConfigEntry>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            need_issues_a: true,
            need_issues_b: true,
            need_recons_a: false,
            need_recons_b: false,
            allow_duplicates: false,
            fuzzy_optimization: None,
            discrepancy_matching: None,
            normalization_type: NormalizationType::Default,
            time_shift_from: 0,
            time_shift_to: 0,
            time_tolerance_from: 0,
            time_tolerance_to: 0,
            correlation_limit: CorrelationLimit::Auto,
            output_limit_a: None,
            output_limit_b: None,
            correlation_config: Vec::new(),
            discrepancy_config: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationConfig {
    pub period_back: i64,
    pub period_number: i64,
    pub period_type: PeriodType,
    pub enabled: bool,
}

/// The per-side half of a control's source wiring.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub source_name: String,
    pub date_field: String,
    /// `Some(column)` for a real declared key column (mandatory for views);
    /// `None` means the underlying row identity (`rowid`) is used.
    pub key_field: Option<String>,
    /// Column alias the synthesized key is exposed under in `SOURCE_*`.
    pub key_alias: String,
    pub filter: Option<String>,
    pub output_table: String,
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub control_id: i64,
    pub control_name: String,
    pub source_a: SourceConfig,
    pub source_b: SourceConfig,
    pub period_back: i64,
    pub period_number: i64,
    pub period_type: PeriodType,
    pub parallelism: usize,
    pub timeout_secs: Option<u64>,
    pub instance_limit: usize,
    pub output_limit: Option<usize>,
    pub rule_config: RuleConfig,
    pub iteration_config: Vec<IterationConfig>,
}

/// A scalar value read out of an arbitrary source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Real(r) => Some(*r),
            FieldValue::Text(s) => s.parse::<f64>().ok(),
            FieldValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn display(&self) -> String {
        match self {
            FieldValue::Null => "\u{0}NULL\u{0}".to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Real(r) => r.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

impl rusqlite::types::FromSql for FieldValue {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        use rusqlite::types::ValueRef;
        Ok(match value {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(i) => FieldValue::Int(i),
            ValueRef::Real(r) => FieldValue::Real(r),
            ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => FieldValue::Null,
        })
    }
}

/// One row fetched from `SOURCE_A`/`SOURCE_B`: the synthesized key, the
/// coerced date, and every original column keyed by name.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub row_id: i64,
    pub key_value: String,
    pub date_time: NaiveDateTime,
    pub fields: HashMap<String, FieldValue>,
}

impl SourceRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationType {
    O,
    F,
    A,
    B,
    M,
}

impl CorrelationType {
    /// Priority used by the Organizer to pick one type per source key when
    /// it participates in COMB rows of more than one type.
    fn priority(self) -> u8 {
        match self {
            CorrelationType::O => 0,
            CorrelationType::F => 1,
            CorrelationType::A => 2,
            CorrelationType::B => 3,
            CorrelationType::M => 4,
        }
    }

    pub fn best_of(a: CorrelationType, b: CorrelationType) -> CorrelationType {
        if a.priority() <= b.priority() {
            a
        } else {
            b
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDiscrepancy {
    pub field_name: String,
    pub delta: f64,
    pub in_tolerance: bool,
}

/// A candidate pair in `COMB`.
#[derive(Debug, Clone)]
pub struct CombRow {
    pub a_id: i64,
    pub b_id: i64,
    pub key_value: String,
    pub date_value_a: NaiveDateTime,
    pub date_value_b: NaiveDateTime,
    pub time_shift_value: i64,
    pub time_shift_rank_a: i64,
    pub time_shift_rank_b: i64,
    pub time_shift_group_number: i64,
    pub discrepancy_time: bool,
    pub discrepancy_fields: Vec<FieldDiscrepancy>,
    pub discrepancy_rank: i64,
    pub total_match_number_a: i64,
    pub total_match_number_b: i64,
    pub match_position_a: i64,
    pub match_position_b: i64,
    pub correlation_type: CorrelationType,
    pub correlation_status_resolved: bool,
    pub correlation_indicator: bool,
}

impl CombRow {
    pub fn has_discrepancy(&self) -> bool {
        self.discrepancy_time || self.discrepancy_fields.iter().any(|d| !d.in_tolerance)
    }

    pub fn magnitude(&self) -> f64 {
        let time_part = self.time_shift_value.unsigned_abs() as f64;
        let field_part: f64 = self.discrepancy_fields.iter().map(|d| d.delta.abs()).sum();
        time_part + field_part
    }
}

/// One row in `ORG_A`/`ORG_B`: the matching topology for a single source key.
#[derive(Debug, Clone)]
pub struct OrgEntry {
    pub row_id: i64,
    pub key_value: String,
    pub correlation_type: Option<CorrelationType>,
    pub correlation_indicator: bool,
}

/// A pair resolved by the Fuzzy Duplicate Resolver.
#[derive(Debug, Clone, Copy)]
pub struct DupPair {
    pub a_id: i64,
    pub b_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    Success,
    Loss,
    Duplicate,
    Discrepancy,
}

impl ResultType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Success => "Success",
            ResultType::Loss => "Loss",
            ResultType::Duplicate => "Duplicate",
            ResultType::Discrepancy => "Discrepancy",
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, ResultType::Success)
    }
}

#[derive(Debug, Clone)]
pub struct ResultRow {
    pub row_id: i64,
    pub key_value: String,
    pub date_time: NaiveDateTime,
    pub result_type: ResultType,
    pub discrepancy_id: Option<i64>,
    pub discrepancy_description: Option<String>,
}
