//! Polymorphism over control types: the repository ships several control
//! kinds, each with the capability set `{fetch, correlate, classify, save}`.
//! Only
//! `Reconciliation` has a full implementation — Analysis, Comparison,
//! Report, and KPI are out of scope as features but are modeled as sibling
//! variants so the polymorphism itself is real and testable.
//!
//! Grounded on `signals/correlator.rs`'s config-struct-plus-engine-struct
//! shape, generalized to a trait so `runner.rs` can dispatch without
//! knowing which kind it holds.

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::config::GlobalConfig;
use crate::engine::EngineRunOutcome;
use crate::error::RapoError;
use crate::model::ControlConfig;
use crate::process::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Analysis,
    Reconciliation,
    Comparison,
    Report,
    Kpi,
}

impl ControlKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Analysis" => Some(Self::Analysis),
            "Reconciliation" => Some(Self::Reconciliation),
            "Comparison" => Some(Self::Comparison),
            "Report" => Some(Self::Report),
            "Kpi" => Some(Self::Kpi),
            _ => None,
        }
    }
}

/// The capability set every control kind nominally offers. `fetch` and
/// `correlate` are folded into `run` for `ReconciliationControl` since the
/// eight-stage pipeline does not expose them as separately callable steps;
/// the stub kinds surface the same shape without an implementation.
pub trait Control {
    fn kind(&self) -> ControlKind;

    fn run(
        &self,
        conn: &Connection,
        control: &ControlConfig,
        now: NaiveDate,
        process_id: ProcessId,
        global: &GlobalConfig,
    ) -> Result<EngineRunOutcome, RapoError>;
}

/// The only control kind with a real pipeline: the eight-stage
/// reconciliation pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconciliationControl;

impl Control for ReconciliationControl {
    fn kind(&self) -> ControlKind {
        ControlKind::Reconciliation
    }

    fn run(
        &self,
        conn: &Connection,
        control: &ControlConfig,
        now: NaiveDate,
        process_id: ProcessId,
        global: &GlobalConfig,
    ) -> Result<EngineRunOutcome, RapoError> {
        crate::engine::run_pipeline(conn, control, now, process_id, global)
    }
}

macro_rules! stub_control {
    ($name:ident, $kind:ident) => {
        #[doc = concat!("Stub for the `", stringify!($kind), "` control kind; out of scope for this engine.")]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl Control for $name {
            fn kind(&self) -> ControlKind {
                ControlKind::$kind
            }

            fn run(
                &self,
                _conn: &Connection,
                _control: &ControlConfig,
                _now: NaiveDate,
                _process_id: ProcessId,
                _global: &GlobalConfig,
            ) -> Result<EngineRunOutcome, RapoError> {
                Err(RapoError::ConfigInvalid(format!(
                    "control kind {:?} is not implemented",
                    ControlKind::$kind
                )))
            }
        }
    };
}

stub_control!(AnalysisControl, Analysis);
stub_control!(ComparisonControl, Comparison);
stub_control!(ReportControl, Report);
stub_control!(KpiControl, Kpi);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_kinds_refuse_to_run() {
        let conn = Connection::open_in_memory().unwrap();
        let control = ControlConfig {
            control_id: 1,
            control_name: "demo".to_string(),
            source_a: crate::model::SourceConfig {
                source_name: "a".to_string(),
                date_field: "d".to_string(),
                key_field: None,
                key_alias: "k".to_string(),
                filter: None,
                output_table: "out_a".to_string(),
            },
            source_b: crate::model::SourceConfig {
                source_name: "b".to_string(),
                date_field: "d".to_string(),
                key_field: None,
                key_alias: "k".to_string(),
                filter: None,
                output_table: "out_b".to_string(),
            },
            period_back: 0,
            period_number: 1,
            period_type: crate::model::PeriodType::D,
            parallelism: 1,
            timeout_secs: None,
            instance_limit: 1,
            output_limit: None,
            rule_config: crate::model::RuleConfig::default(),
            iteration_config: vec![],
        };
        let now = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let err = AnalysisControl
            .run(&conn, &control, now, ProcessId::new_v4(), &GlobalConfig::default())
            .unwrap_err();
        assert!(matches!(err, RapoError::ConfigInvalid(_)));
    }
}
