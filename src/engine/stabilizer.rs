//! Match Stabilizer: a fixed-point loop that resolves `A`/`B`/`M`
//! candidates by mutual preference, converging in at most `min(|A|, |B|)`
//! iterations.
//!
//! The fixed-point shape has no direct analogue elsewhere in this crate,
//! but is instrumented the way
//! `arbitrage/engine.rs::ArbitrageEngine::scan_opportunities` logs each pass
//! of its own iterative scan.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::model::{CombRow, CorrelationType, OrgEntry};

/// Runs the stabilization loop in place. Returns the number of iterations
/// performed (0 if nothing was eligible at all).
#[instrument(skip_all, fields(comb = comb.len()))]
pub fn stabilize(comb: &mut [CombRow], org_a: &mut [OrgEntry], org_b: &mut [OrgEntry]) -> usize {
    let mut resolved_a: HashSet<i64> = org_a
        .iter()
        .filter(|e| e.correlation_indicator)
        .map(|e| e.row_id)
        .collect();
    let mut resolved_b: HashSet<i64> = org_b
        .iter()
        .filter(|e| e.correlation_indicator)
        .map(|e| e.row_id)
        .collect();

    let max_iterations = comb.len().max(1);
    let mut iteration = 0;
    loop {
        if iteration >= max_iterations {
            break;
        }
        let candidate_indices: Vec<usize> = comb
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                matches!(
                    row.correlation_type,
                    CorrelationType::A | CorrelationType::B | CorrelationType::M
                ) && !row.correlation_status_resolved
                    && !resolved_a.contains(&row.a_id)
                    && !resolved_b.contains(&row.b_id)
            })
            .map(|(idx, _)| idx)
            .collect();

        if candidate_indices.is_empty() {
            break;
        }

        let a_best = best_per_side(comb, &candidate_indices, true);
        let b_best = best_per_side(comb, &candidate_indices, false);

        let mut selected = Vec::new();
        for &idx in &candidate_indices {
            let row = &comb[idx];
            if a_best.get(&row.a_id) == Some(&row.b_id) && b_best.get(&row.b_id) == Some(&row.a_id) {
                selected.push(idx);
            }
        }

        if selected.is_empty() {
            break;
        }

        for idx in &selected {
            let row = &mut comb[*idx];
            row.correlation_status_resolved = true;
            row.correlation_indicator = true;
            resolved_a.insert(row.a_id);
            resolved_b.insert(row.b_id);
        }

        iteration += 1;
        debug!(iteration, selected = selected.len(), "stabilizer round");
    }

    for entry in org_a.iter_mut() {
        if resolved_a.contains(&entry.row_id) {
            entry.correlation_indicator = true;
        }
    }
    for entry in org_b.iter_mut() {
        if resolved_b.contains(&entry.row_id) {
            entry.correlation_indicator = true;
        }
    }

    iteration
}

/// For each row id on the chosen side, find its favorite opposite-side id:
/// the candidate with the lowest `(discrepancy_rank, time_shift_rank_side,
/// other_id)` tuple.
fn best_per_side(comb: &[CombRow], indices: &[usize], side_a: bool) -> HashMap<i64, i64> {
    let mut grouped: HashMap<i64, Vec<usize>> = HashMap::new();
    for &idx in indices {
        let row = &comb[idx];
        let id = if side_a { row.a_id } else { row.b_id };
        grouped.entry(id).or_default().push(idx);
    }

    let mut out = HashMap::new();
    for (id, group) in grouped {
        let best_idx = *group
            .iter()
            .min_by_key(|&&idx| {
                let row = &comb[idx];
                let shift_rank = if side_a { row.time_shift_rank_a } else { row.time_shift_rank_b };
                let other_id = if side_a { row.b_id } else { row.a_id };
                (row.discrepancy_rank, shift_rank, other_id)
            })
            .unwrap();
        let other_id = if side_a { comb[best_idx].b_id } else { comb[best_idx].a_id };
        out.insert(id, other_id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 10).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn row(a_id: i64, b_id: i64, ctype: CorrelationType, discrepancy_rank: i64, shift_rank: i64) -> CombRow {
        CombRow {
            a_id,
            b_id,
            key_value: "k".to_string(),
            date_value_a: date(),
            date_value_b: date(),
            time_shift_value: 0,
            time_shift_rank_a: shift_rank,
            time_shift_rank_b: shift_rank,
            time_shift_group_number: 0,
            discrepancy_time: false,
            discrepancy_fields: vec![],
            discrepancy_rank,
            total_match_number_a: 2,
            total_match_number_b: 1,
            match_position_a: 1,
            match_position_b: 1,
            correlation_type: ctype,
            correlation_status_resolved: false,
            correlation_indicator: false,
        }
    }

    fn org(id: i64) -> OrgEntry {
        OrgEntry {
            row_id: id,
            key_value: "k".to_string(),
            correlation_type: Some(CorrelationType::A),
            correlation_indicator: false,
        }
    }

    #[test]
    fn mutual_first_choice_resolves_in_one_round() {
        let mut comb = vec![
            row(1, 10, CorrelationType::A, 1, 1),
            row(1, 11, CorrelationType::A, 2, 2),
        ];
        let mut org_a = vec![org(1)];
        let mut org_b = vec![org(10), org(11)];
        let rounds = stabilize(&mut comb, &mut org_a, &mut org_b);
        assert_eq!(rounds, 1);
        assert!(comb[0].correlation_status_resolved);
        assert!(!comb[1].correlation_status_resolved);
        assert!(org_a[0].correlation_indicator);
        assert!(org_b[0].correlation_indicator);
        assert!(!org_b[1].correlation_indicator);
    }

    #[test]
    fn no_candidates_terminates_immediately() {
        let mut comb: Vec<CombRow> = vec![];
        let mut org_a = vec![];
        let mut org_b = vec![];
        assert_eq!(stabilize(&mut comb, &mut org_a, &mut org_b), 0);
    }
}
