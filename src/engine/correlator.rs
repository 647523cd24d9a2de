//! Correlator: joins `SOURCE_A` × `SOURCE_B` on correlation key rules and
//! date proximity, computing per-pair features and initial
//! `correlation_type` labels.
//!
//! Grounded on `signals/correlator.rs::SignalCorrelator::analyze_correlations`
//! (group-by-key, then classify-per-group shape) and `arbitrage/engine.rs`
//! (comparing two independently-fetched sources). The cross join itself is
//! implemented as a hash join keyed on the correlation fields rather than a
//! literal nested loop: candidates can only ever share a correlation key,
//! so bucketing by that key is both correct and avoids the O(|A|·|B|) blow-up
//! the `correlation_limit` guard exists to catch in the first place.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use tracing::instrument;

use crate::error::RapoError;
use crate::model::{
    CombRow, CorrelationLimit, CorrelationType, DiscrepancyConfigEntry, FieldDiscrepancy,
    FieldValue, NormalizationType, RuleConfig, SourceRecord,
};
use crate::sql::ast::eval_formula;

/// Resolve a `correlation_config`/`discrepancy_config` field reference to a
/// numeric or string value for a given row.
fn resolve_value(
    row: &SourceRecord,
    field: &str,
    formula_mode: bool,
) -> Result<FieldValue, RapoError> {
    if formula_mode {
        let v = eval_formula(field, &row.fields)?;
        Ok(FieldValue::Real(v))
    } else {
        Ok(row.get(field).cloned().unwrap_or(FieldValue::Null))
    }
}

/// Bucket key built from every `correlation_config` entry's value on one
/// side. Nulls on `allow_null = true` fields are normalized to a sentinel so
/// that null-on-both-sides buckets together; a null on
/// an `allow_null = false` field disqualifies the row from correlating at
/// all, and such rows are simply never placed in a bucket.
fn bucket_key(
    row: &SourceRecord,
    rules: &[crate::model::CorrelationConfigEntry],
    field_selector: impl Fn(&crate::model::CorrelationConfigEntry) -> &str,
) -> Option<Vec<String>> {
    let mut key = Vec::with_capacity(rules.len());
    for rule in rules {
        let field = field_selector(rule);
        let value = resolve_value(row, field, rule.formula_mode).ok()?;
        if value.is_null() {
            if rule.allow_null {
                key.push(FieldValue::Null.display());
            } else {
                return None;
            }
        } else {
            key.push(value.display());
        }
    }
    Some(key)
}

fn time_shift_seconds(a: NaiveDateTime, b: NaiveDateTime) -> i64 {
    (a - b).num_seconds()
}

/// Normalize a pooled batch of raw values: `none`/`default`
/// is the identity, `minmax` and `z_norm` are computed across the whole
/// batch (not per pair), and `rank` is each value's dense rank within it.
fn normalize_pooled(values: &[f64], normalization: NormalizationType) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    match normalization {
        NormalizationType::None | NormalizationType::Default => values.to_vec(),
        NormalizationType::MinMax => {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let span = max - min;
            values
                .iter()
                .map(|&v| if span.abs() < f64::EPSILON { 0.0 } else { (v - min) / span })
                .collect()
        }
        NormalizationType::Rank => dense_rank_values(values),
        NormalizationType::ZNorm => {
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std_dev = variance.sqrt();
            values
                .iter()
                .map(|&v| if std_dev.abs() < f64::EPSILON { 0.0 } else { (v - mean) / std_dev })
                .collect()
        }
    }
}

fn dense_rank_values(values: &[f64]) -> Vec<f64> {
    let mut distinct: Vec<f64> = values.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap());
    distinct.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    values
        .iter()
        .map(|v| {
            let rank = distinct
                .iter()
                .position(|d| (*d - *v).abs() < f64::EPSILON)
                .unwrap();
            rank as f64 + 1.0
        })
        .collect()
}

/// Compute every pair's `discrepancy_fields`, one `Vec<FieldDiscrepancy>` per
/// raw pair in the same order. Normalization is batch-wide per rule (the
/// pooled A and B values across *all* candidate pairs), so this runs once
/// after every candidate has been gathered rather than per pair.
fn compute_all_discrepancies(
    raw_pairs: &[RawPair],
    rules: &[DiscrepancyConfigEntry],
    normalization: NormalizationType,
) -> Vec<Vec<FieldDiscrepancy>> {
    let mut out = vec![Vec::with_capacity(rules.len()); raw_pairs.len()];
    for (r, rule) in rules.iter().enumerate() {
        let pooled: Vec<f64> = raw_pairs
            .iter()
            .flat_map(|p| {
                let (va, vb) = p.raw_values[r];
                [va, vb]
            })
            .collect();
        let normalized = normalize_pooled(&pooled, normalization);

        for (i, entry) in out.iter_mut().enumerate() {
            let na = normalized[2 * i];
            let nb = normalized[2 * i + 1];
            let delta = if rule.percentage_mode {
                if nb.abs() < f64::EPSILON {
                    0.0
                } else {
                    ((na - nb) / nb) * 100.0
                }
            } else {
                na - nb
            };
            let in_tolerance = delta >= rule.numeric_tolerance_from && delta <= rule.numeric_tolerance_to;
            entry.push(FieldDiscrepancy {
                field_name: rule.label().to_string(),
                delta,
                in_tolerance,
            });
        }
    }
    out
}

/// Candidate pair before ranks/groups/types are assigned.
struct RawPair<'a> {
    a: &'a SourceRecord,
    b: &'a SourceRecord,
    key_value: String,
    time_shift_value: i64,
    /// Raw (pre-normalization) `(value_a, value_b)` per `discrepancy_config`
    /// entry, aligned by index.
    raw_values: Vec<(f64, f64)>,
    discrepancy_fields: Vec<FieldDiscrepancy>,
}

fn estimate_candidate_count(
    buckets_a: &HashMap<Vec<String>, Vec<&SourceRecord>>,
    buckets_b: &HashMap<Vec<String>, Vec<&SourceRecord>>,
) -> u64 {
    let mut total: u64 = 0;
    for (k, a_rows) in buckets_a {
        if let Some(b_rows) = buckets_b.get(k) {
            total += a_rows.len() as u64 * b_rows.len() as u64;
        }
    }
    total
}

fn correlation_limit_value(limit: CorrelationLimit, len_a: usize, len_b: usize) -> Option<u64> {
    match limit {
        CorrelationLimit::Unbounded => None,
        CorrelationLimit::Fixed(n) => Some(n),
        CorrelationLimit::Auto => {
            let bigger = len_a.max(len_b) as f64;
            Some((2.5 * bigger).ceil() as u64)
        }
    }
}

/// Run the Correlator stage, producing `COMB` (ungrouped, unranked pairs are
/// grouped/ranked/labeled in place before returning).
#[instrument(skip_all, fields(a_count = source_a.len(), b_count = source_b.len()))]
pub fn correlate(
    source_a: &[SourceRecord],
    source_b: &[SourceRecord],
    rule_config: &RuleConfig,
    global_normalization_default: NormalizationType,
) -> Result<Vec<CombRow>, RapoError> {
    if rule_config.correlation_config.is_empty() {
        return Err(RapoError::ConfigInvalid(
            "correlation_config must not be empty".to_string(),
        ));
    }
    let normalization = rule_config.normalization_type.resolve(global_normalization_default);

    let mut buckets_a: HashMap<Vec<String>, Vec<&SourceRecord>> = HashMap::new();
    for row in source_a {
        if let Some(key) = bucket_key(row, &rule_config.correlation_config, |r| &r.field_a) {
            buckets_a.entry(key).or_default().push(row);
        }
    }
    let mut buckets_b: HashMap<Vec<String>, Vec<&SourceRecord>> = HashMap::new();
    for row in source_b {
        if let Some(key) = bucket_key(row, &rule_config.correlation_config, |r| &r.field_b) {
            buckets_b.entry(key).or_default().push(row);
        }
    }

    let estimated = estimate_candidate_count(&buckets_a, &buckets_b);
    if let Some(limit) = correlation_limit_value(rule_config.correlation_limit, source_a.len(), source_b.len()) {
        if estimated > limit {
            return Err(RapoError::CorrelationLimitExceeded {
                candidates: estimated,
                limit,
            });
        }
    }

    let mut raw_pairs: Vec<RawPair> = Vec::new();
    for (bucket, a_rows) in &buckets_a {
        let Some(b_rows) = buckets_b.get(bucket) else {
            continue;
        };
        let key_value = bucket.join("\u{1}");
        for a in a_rows {
            for b in b_rows {
                let shift = time_shift_seconds(a.date_time, b.date_time);
                if shift < rule_config.time_shift_from || shift > rule_config.time_shift_to {
                    continue;
                }
                let mut raw_values = Vec::with_capacity(rule_config.discrepancy_config.len());
                for rule in &rule_config.discrepancy_config {
                    let va = resolve_value(a, &rule.field_a, rule.formula_mode)?.as_f64().unwrap_or(0.0);
                    let vb = resolve_value(b, &rule.field_b, rule.formula_mode)?.as_f64().unwrap_or(0.0);
                    raw_values.push((va, vb));
                }
                raw_pairs.push(RawPair {
                    a,
                    b,
                    key_value: key_value.clone(),
                    time_shift_value: shift,
                    raw_values,
                    discrepancy_fields: Vec::new(),
                });
            }
        }
    }

    let discrepancy_fields = compute_all_discrepancies(&raw_pairs, &rule_config.discrepancy_config, normalization);
    for (pair, fields) in raw_pairs.iter_mut().zip(discrepancy_fields) {
        pair.discrepancy_fields = fields;
    }

    Ok(finalize_comb(raw_pairs, rule_config))
}

/// Time-shift grouping, rank computation, and `correlation_type` labeling.
fn finalize_comb(raw_pairs: Vec<RawPair>, rule_config: &RuleConfig) -> Vec<CombRow> {
    let envelope_radius = rule_config.time_shift_to.max(-rule_config.time_shift_from).max(0);

    // Group raw pairs by key_value for time-shift clustering.
    let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, pair) in raw_pairs.iter().enumerate() {
        by_key.entry(pair.key_value.clone()).or_default().push(idx);
    }

    let mut group_number: Vec<i64> = vec![0; raw_pairs.len()];
    for indices in by_key.values() {
        let mut ordered = indices.clone();
        ordered.sort_by_key(|&i| raw_pairs[i].a.date_time.max(raw_pairs[i].b.date_time));
        let mut current_group = 0i64;
        let mut prev_max: Option<NaiveDateTime> = None;
        for &idx in &ordered {
            let this_max = raw_pairs[idx].a.date_time.max(raw_pairs[idx].b.date_time);
            if let Some(prev) = prev_max {
                let gap = (this_max - prev).num_seconds().abs();
                if gap > envelope_radius {
                    current_group += 1;
                }
            }
            group_number[idx] = current_group;
            prev_max = Some(this_max);
        }
    }

    // Distinct a_id/b_id counts per (key_value, group_number). Stored onto
    // COMB cross-wise: total_match_number_a holds the distinct b_id count
    // (how many B rows this A row's group spreads across), and vice versa.
    let mut a_counts: HashMap<(String, i64), std::collections::HashSet<i64>> = HashMap::new();
    let mut b_counts: HashMap<(String, i64), std::collections::HashSet<i64>> = HashMap::new();
    for (idx, pair) in raw_pairs.iter().enumerate() {
        let composite = (pair.key_value.clone(), group_number[idx]);
        a_counts.entry(composite.clone()).or_default().insert(pair.a.row_id);
        b_counts.entry(composite).or_default().insert(pair.b.row_id);
    }

    // Per-pair discrepancy magnitude rank within (key_value, group_number).
    let mut magnitude_groups: HashMap<(String, i64), Vec<usize>> = HashMap::new();
    for (idx, pair) in raw_pairs.iter().enumerate() {
        magnitude_groups
            .entry((pair.key_value.clone(), group_number[idx]))
            .or_default()
            .push(idx);
    }
    let mut discrepancy_rank: Vec<i64> = vec![0; raw_pairs.len()];
    for indices in magnitude_groups.values() {
        let mut ordered = indices.clone();
        ordered.sort_by(|&i, &j| magnitude(&raw_pairs[i]).partial_cmp(&magnitude(&raw_pairs[j])).unwrap());
        let mut rank = 0i64;
        let mut prev: Option<f64> = None;
        for &idx in &ordered {
            let m = magnitude(&raw_pairs[idx]);
            if prev != Some(m) {
                rank += 1;
            }
            discrepancy_rank[idx] = rank;
            prev = Some(m);
        }
    }

    // time_shift_rank per side: dense rank of |time_shift| among pairs
    // sharing the same a_id (resp. b_id).
    let mut rank_by_a: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut rank_by_b: HashMap<i64, Vec<usize>> = HashMap::new();
    for (idx, pair) in raw_pairs.iter().enumerate() {
        rank_by_a.entry(pair.a.row_id).or_default().push(idx);
        rank_by_b.entry(pair.b.row_id).or_default().push(idx);
    }
    let mut time_shift_rank_a: Vec<i64> = vec![0; raw_pairs.len()];
    let mut time_shift_rank_b: Vec<i64> = vec![0; raw_pairs.len()];
    for indices in rank_by_a.values() {
        assign_dense_rank(indices, &raw_pairs, &mut time_shift_rank_a, |p| p.time_shift_value.unsigned_abs() as f64);
    }
    for indices in rank_by_b.values() {
        assign_dense_rank(indices, &raw_pairs, &mut time_shift_rank_b, |p| p.time_shift_value.unsigned_abs() as f64);
    }

    // match_position per side (positional order within the match group).
    let mut position_by_a: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut position_by_b: HashMap<i64, Vec<usize>> = HashMap::new();
    for (idx, pair) in raw_pairs.iter().enumerate() {
        position_by_a.entry(pair.a.row_id).or_default().push(idx);
        position_by_b.entry(pair.b.row_id).or_default().push(idx);
    }
    let mut match_position_a: Vec<i64> = vec![0; raw_pairs.len()];
    let mut match_position_b: Vec<i64> = vec![0; raw_pairs.len()];
    for indices in position_by_a.values() {
        for (pos, &idx) in indices.iter().enumerate() {
            match_position_a[idx] = pos as i64 + 1;
        }
    }
    for indices in position_by_b.values() {
        for (pos, &idx) in indices.iter().enumerate() {
            match_position_b[idx] = pos as i64 + 1;
        }
    }

    let mut out = Vec::with_capacity(raw_pairs.len());
    for (idx, pair) in raw_pairs.into_iter().enumerate() {
        let composite = (pair.key_value.clone(), group_number[idx]);
        let distinct_a = a_counts.get(&composite).map(|s| s.len() as i64).unwrap_or(0);
        let distinct_b = b_counts.get(&composite).map(|s| s.len() as i64).unwrap_or(0);
        let correlation_type = classify_pair(distinct_a, distinct_b);
        let discrepancy_time = pair.time_shift_value < rule_config.time_tolerance_from
            || pair.time_shift_value > rule_config.time_tolerance_to;
        let is_o = correlation_type == CorrelationType::O;
        out.push(CombRow {
            a_id: pair.a.row_id,
            b_id: pair.b.row_id,
            key_value: pair.key_value,
            date_value_a: pair.a.date_time,
            date_value_b: pair.b.date_time,
            time_shift_value: pair.time_shift_value,
            time_shift_rank_a: time_shift_rank_a[idx],
            time_shift_rank_b: time_shift_rank_b[idx],
            time_shift_group_number: group_number[idx],
            discrepancy_time,
            discrepancy_fields: pair.discrepancy_fields,
            discrepancy_rank: discrepancy_rank[idx],
            total_match_number_a: distinct_b,
            total_match_number_b: distinct_a,
            match_position_a: match_position_a[idx],
            match_position_b: match_position_b[idx],
            correlation_type,
            correlation_status_resolved: is_o,
            correlation_indicator: is_o,
        });
    }
    out
}

fn magnitude(pair: &RawPair) -> f64 {
    let time_part = pair.time_shift_value.unsigned_abs() as f64;
    let field_part: f64 = pair.discrepancy_fields.iter().map(|d| d.delta.abs()).sum();
    time_part + field_part
}

fn assign_dense_rank(
    indices: &[usize],
    raw_pairs: &[RawPair],
    out: &mut [i64],
    key_fn: impl Fn(&RawPair) -> f64,
) {
    let mut ordered = indices.to_vec();
    ordered.sort_by(|&i, &j| key_fn(&raw_pairs[i]).partial_cmp(&key_fn(&raw_pairs[j])).unwrap());
    let mut rank = 0i64;
    let mut prev: Option<f64> = None;
    for idx in ordered {
        let v = key_fn(&raw_pairs[idx]);
        if prev != Some(v) {
            rank += 1;
        }
        out[idx] = rank;
        prev = Some(v);
    }
}

fn classify_pair(total_a: i64, total_b: i64) -> CorrelationType {
    match (total_a, total_b) {
        (1, 1) => CorrelationType::O,
        (a, b) if a == b && a > 1 => CorrelationType::F,
        (1, b) if b > 1 => CorrelationType::A,
        (a, 1) if a > 1 => CorrelationType::B,
        _ => CorrelationType::M,
    }
}

/// Parallel helper kept for stages that want to fan the per-row feature
/// computation out across `parallelism` workers (the CPU-bound analog of a
/// SQL-level `parallelism` hint).
pub fn parallel_sum_discrepancy(rows: &[CombRow]) -> f64 {
    rows.par_iter().map(CombRow::magnitude).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CorrelationConfigEntry;
    use std::collections::HashMap as Map;

    fn record(id: i64, key: &str, date: &str, v: f64) -> SourceRecord {
        let mut fields = Map::new();
        fields.insert("k".to_string(), FieldValue::Text(key.to_string()));
        fields.insert("v".to_string(), FieldValue::Real(v));
        SourceRecord {
            row_id: id,
            key_value: key.to_string(),
            date_time: NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S").unwrap(),
            fields,
        }
    }

    fn base_rule_config() -> RuleConfig {
        RuleConfig {
            correlation_config: vec![CorrelationConfigEntry {
                field_a: "k".into(),
                field_b: "k".into(),
                allow_null: false,
                formula_mode: false,
            }],
            time_shift_from: -60,
            time_shift_to: 60,
            time_tolerance_from: -60,
            time_tolerance_to: 60,
            ..RuleConfig::default()
        }
    }

    #[test]
    fn one_to_one_is_success_shaped() {
        let a = vec![record(1, "k1", "2026-07-10 10:00:00", 10.0)];
        let b = vec![record(2, "k1", "2026-07-10 10:00:00", 10.0)];
        let comb = correlate(&a, &b, &base_rule_config(), NormalizationType::None).unwrap();
        assert_eq!(comb.len(), 1);
        assert_eq!(comb[0].correlation_type, CorrelationType::O);
        assert!(comb[0].correlation_indicator);
        assert!(!comb[0].has_discrepancy());
    }

    #[test]
    fn one_to_many_is_labeled_a() {
        let a = vec![record(1, "k1", "2026-07-10 10:00:00", 10.0)];
        let b = vec![
            record(2, "k1", "2026-07-10 10:00:00", 10.0),
            record(3, "k1", "2026-07-10 10:00:10", 11.0),
        ];
        let comb = correlate(&a, &b, &base_rule_config(), NormalizationType::None).unwrap();
        assert!(comb.iter().all(|c| c.correlation_type == CorrelationType::A));
    }

    #[test]
    fn out_of_envelope_is_not_a_candidate() {
        let a = vec![record(1, "k1", "2026-07-10 10:00:00", 10.0)];
        let b = vec![record(2, "k1", "2026-07-10 10:05:00", 10.0)];
        let comb = correlate(&a, &b, &base_rule_config(), NormalizationType::None).unwrap();
        assert!(comb.is_empty());
    }

    #[test]
    fn correlation_limit_is_enforced() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for i in 0..50 {
            a.push(record(i, "same", "2026-07-10 10:00:00", 0.0));
            b.push(record(1000 + i, "same", "2026-07-10 10:00:00", 0.0));
        }
        let mut rule_config = base_rule_config();
        rule_config.correlation_limit = CorrelationLimit::Fixed(10);
        let err = correlate(&a, &b, &rule_config, NormalizationType::None).unwrap_err();
        assert!(matches!(err, RapoError::CorrelationLimitExceeded { .. }));
    }

    #[test]
    fn empty_correlation_config_is_invalid() {
        let a = vec![record(1, "k1", "2026-07-10 10:00:00", 10.0)];
        let b = vec![record(2, "k1", "2026-07-10 10:00:00", 10.0)];
        let mut rule_config = base_rule_config();
        rule_config.correlation_config.clear();
        let err = correlate(&a, &b, &rule_config, NormalizationType::None).unwrap_err();
        assert!(matches!(err, RapoError::ConfigInvalid(_)));
    }

    #[test]
    fn minmax_normalizes_across_the_whole_batch() {
        let values = vec![0.0, 5.0, 10.0];
        let normalized = normalize_pooled(&values, NormalizationType::MinMax);
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn rank_assigns_dense_rank() {
        let values = vec![10.0, 10.0, 20.0, 5.0];
        let normalized = normalize_pooled(&values, NormalizationType::Rank);
        assert_eq!(normalized, vec![2.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn z_norm_centers_on_the_batch_mean() {
        let values = vec![1.0, 2.0, 3.0];
        let normalized = normalize_pooled(&values, NormalizationType::ZNorm);
        assert!((normalized[1]).abs() < 1e-9, "mean value should land on zero: {:?}", normalized);
    }

    #[test]
    fn z_norm_changes_which_pairs_are_in_tolerance() {
        let mut rule_config = base_rule_config();
        rule_config.discrepancy_config.push(DiscrepancyConfigEntry {
            field_a: "v".into(),
            field_b: "v".into(),
            numeric_tolerance_from: -0.1,
            numeric_tolerance_to: 0.1,
            percentage_mode: false,
            formula_mode: false,
            formula_alias: None,
        });
        let a = vec![
            record(1, "k1", "2026-07-10 10:00:00", 10.0),
            record(2, "k2", "2026-07-10 10:00:00", 1000.0),
        ];
        let b = vec![
            record(3, "k1", "2026-07-10 10:00:00", 13.0),
            record(4, "k2", "2026-07-10 10:00:00", 1003.0),
        ];

        let raw = correlate(&a, &b, &rule_config, NormalizationType::None).unwrap();
        assert!(raw.iter().all(|c| c.has_discrepancy()), "a delta of 3 is outside +/-0.1 raw");

        rule_config.normalization_type = NormalizationType::ZNorm;
        let normalized = correlate(&a, &b, &rule_config, NormalizationType::None).unwrap();
        assert!(
            normalized.iter().all(|c| !c.has_discrepancy()),
            "both pairs carry the same absolute offset, so z_norm should equalize their deltas to ~0"
        );
    }
}
