//! Classifier: the terminal per-row decision — Success, Loss, Duplicate,
//! or Discrepancy — for every source row on one side.
//!
//! Grounded on `signals/correlator.rs`'s pattern-detection match arms: a
//! small `match` over mutually-exclusive, priority-ordered conditions
//! rather than a chain of independent `if`s.

use std::collections::HashMap;

use tracing::instrument;

use crate::model::{CombRow, OrgEntry, ResultRow, ResultType, Side, SourceRecord};

/// Classify every row on one side.
#[instrument(skip_all, fields(side = side.as_str(), rows = source.len()))]
pub fn classify_side(
    source: &[SourceRecord],
    org: &[OrgEntry],
    comb: &[CombRow],
    side: Side,
    need_issues: bool,
    need_recons: bool,
    allow_duplicates: bool,
    discrepancy_matching: bool,
) -> Vec<ResultRow> {
    let org_by_id: HashMap<i64, &OrgEntry> = org.iter().map(|e| (e.row_id, e)).collect();

    let mut pairs_by_id: HashMap<i64, Vec<&CombRow>> = HashMap::new();
    for row in comb {
        let id = match side {
            Side::A => row.a_id,
            Side::B => row.b_id,
        };
        pairs_by_id.entry(id).or_default().push(row);
    }

    let mut out = Vec::new();
    for record in source {
        let Some(entry) = org_by_id.get(&record.row_id) else {
            continue;
        };
        let all_pairs: &[&CombRow] = pairs_by_id
            .get(&record.row_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let resolved_pairs: Vec<&&CombRow> = all_pairs
            .iter()
            .filter(|r| r.correlation_status_resolved)
            .collect();

        let result = classify_one(entry, &resolved_pairs, all_pairs, allow_duplicates, discrepancy_matching);

        let Some(result_type) = result else {
            continue;
        };
        if result_type == ResultType::Success && !need_recons {
            continue;
        }
        if result_type != ResultType::Success && !need_issues {
            continue;
        }

        let (discrepancy_id, discrepancy_description) = if result_type == ResultType::Discrepancy {
            describe_discrepancy(&resolved_pairs, side)
        } else {
            (None, None)
        };

        out.push(ResultRow {
            row_id: record.row_id,
            key_value: record.key_value.clone(),
            date_time: record.date_time,
            result_type,
            discrepancy_id,
            discrepancy_description,
        });
    }
    out
}

fn classify_one(
    entry: &OrgEntry,
    resolved_pairs: &[&&CombRow],
    all_pairs: &[&CombRow],
    allow_duplicates: bool,
    discrepancy_matching: bool,
) -> Option<ResultType> {
    if entry.correlation_type.is_none() {
        return Some(ResultType::Loss);
    }

    if entry.correlation_indicator {
        let has_discrepancy = resolved_pairs.iter().any(|p| p.has_discrepancy());
        if has_discrepancy {
            return Some(ResultType::Discrepancy);
        }
        return Some(ResultType::Success);
    }

    // Not resolved but has a correlation type: a Duplicate loser. Its
    // "matched peer" for discrepancy_matching purposes is the closest
    // unresolved candidate (lowest discrepancy_rank).
    if discrepancy_matching {
        let peer = all_pairs.iter().min_by_key(|p| p.discrepancy_rank);
        let has_numeric_discrepancy = peer
            .map(|p| p.discrepancy_fields.iter().any(|d| !d.in_tolerance))
            .unwrap_or(false);
        if has_numeric_discrepancy {
            return Some(ResultType::Loss);
        }
    }
    if allow_duplicates {
        return None;
    }
    Some(ResultType::Duplicate)
}

fn describe_discrepancy(resolved_pairs: &[&&CombRow], side: Side) -> (Option<i64>, Option<String>) {
    let Some(offender) = resolved_pairs.iter().find(|p| p.has_discrepancy()) else {
        return (None, None);
    };
    let counterpart_id = match side {
        Side::A => offender.b_id,
        Side::B => offender.a_id,
    };
    let description = offender
        .discrepancy_fields
        .iter()
        .filter(|d| !d.in_tolerance)
        .map(|d| format!("{}[{}]", d.field_name, d.delta.abs()))
        .collect::<Vec<_>>()
        .join(", ");
    (Some(counterpart_id), Some(description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CorrelationType, FieldDiscrepancy};
    use chrono::NaiveDate;
    use std::collections::HashMap as Map;

    fn date() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 10).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn source(id: i64) -> SourceRecord {
        SourceRecord {
            row_id: id,
            key_value: "k".to_string(),
            date_time: date(),
            fields: Map::new(),
        }
    }

    fn org(id: i64, ctype: Option<CorrelationType>, indicator: bool) -> OrgEntry {
        OrgEntry {
            row_id: id,
            key_value: "k".to_string(),
            correlation_type: ctype,
            correlation_indicator: indicator,
        }
    }

    fn comb_row(a_id: i64, b_id: i64, resolved: bool, discrepancy: bool) -> CombRow {
        CombRow {
            a_id,
            b_id,
            key_value: "k".to_string(),
            date_value_a: date(),
            date_value_b: date(),
            time_shift_value: 0,
            time_shift_rank_a: 1,
            time_shift_rank_b: 1,
            time_shift_group_number: 0,
            discrepancy_time: false,
            discrepancy_fields: if discrepancy {
                vec![FieldDiscrepancy {
                    field_name: "amount".to_string(),
                    delta: 99.0,
                    in_tolerance: false,
                }]
            } else {
                vec![]
            },
            discrepancy_rank: 1,
            total_match_number_a: 1,
            total_match_number_b: 1,
            match_position_a: 1,
            match_position_b: 1,
            correlation_type: CorrelationType::O,
            correlation_status_resolved: resolved,
            correlation_indicator: resolved,
        }
    }

    #[test]
    fn loss_when_no_correlation_type() {
        let source = vec![source(1)];
        let org = vec![org(1, None, false)];
        let results = classify_side(&source, &org, &[], Side::A, true, true, false, false);
        assert_eq!(results[0].result_type, ResultType::Loss);
    }

    #[test]
    fn success_when_resolved_without_discrepancy() {
        let source = vec![source(1)];
        let org = vec![org(1, Some(CorrelationType::O), true)];
        let comb = vec![comb_row(1, 10, true, false)];
        let results = classify_side(&source, &org, &comb, Side::A, true, true, false, false);
        assert_eq!(results[0].result_type, ResultType::Success);
    }

    #[test]
    fn discrepancy_when_resolved_with_violation() {
        let source = vec![source(1)];
        let org = vec![org(1, Some(CorrelationType::O), true)];
        let comb = vec![comb_row(1, 10, true, true)];
        let results = classify_side(&source, &org, &comb, Side::A, true, true, false, false);
        assert_eq!(results[0].result_type, ResultType::Discrepancy);
        assert_eq!(results[0].discrepancy_id, Some(10));
        assert!(results[0].discrepancy_description.as_deref().unwrap().contains("amount"));
    }

    #[test]
    fn duplicate_suppressed_when_allow_duplicates() {
        let source = vec![source(1)];
        let org = vec![org(1, Some(CorrelationType::F), false)];
        let results = classify_side(&source, &org, &[], Side::A, true, true, true, false);
        assert!(results.is_empty());
    }

    #[test]
    fn duplicate_reclassified_as_loss_when_discrepancy_matching() {
        let source = vec![source(1)];
        let org = vec![org(1, Some(CorrelationType::F), false)];
        let comb = vec![comb_row(1, 10, false, true)];
        let results = classify_side(&source, &org, &comb, Side::A, true, true, false, true);
        assert_eq!(results[0].result_type, ResultType::Loss);
    }

    #[test]
    fn success_not_emitted_unless_need_recons() {
        let source = vec![source(1)];
        let org = vec![org(1, Some(CorrelationType::O), true)];
        let comb = vec![comb_row(1, 10, true, false)];
        let results = classify_side(&source, &org, &comb, Side::A, true, false, false, false);
        assert!(results.is_empty());
    }

    #[test]
    fn errors_not_emitted_unless_need_issues() {
        let source = vec![source(1)];
        let org = vec![org(1, None, false)];
        let results = classify_side(&source, &org, &[], Side::A, false, true, false, false);
        assert!(results.is_empty());
    }
}
