//! Fuzzy Duplicate Resolver: within an `F` group (a clean n×n cluster
//! where `total_match_number_a = total_match_number_b > 1`),
//! pair A and B rows positionally rather than leaving every combination
//! unresolved for the Match Stabilizer.
//!
//! Grounded on `arbitrage/fees.rs`'s shape: a small, pure, heavily-tested
//! numeric helper with no I/O of its own — this stage never touches the
//! database, it only rewrites `COMB`/`ORG_*` in place.

use std::collections::HashMap;

use tracing::instrument;

use crate::model::{CombRow, CorrelationType, DupPair, OrgEntry};

/// Mutates `comb` to mark resolved pairs and returns the `DUP` rows. `org_a`/
/// `org_b` have their `correlation_indicator` propagated for resolved keys.
#[instrument(skip_all, fields(comb = comb.len()))]
pub fn resolve_fuzzy_duplicates(
    comb: &mut [CombRow],
    org_a: &mut [OrgEntry],
    org_b: &mut [OrgEntry],
    fuzzy_optimization: bool,
) -> Vec<DupPair> {
    if !fuzzy_optimization {
        return Vec::new();
    }

    let mut groups: HashMap<(String, i64), Vec<usize>> = HashMap::new();
    for (idx, row) in comb.iter().enumerate() {
        if row.correlation_type == CorrelationType::F && !row.correlation_status_resolved {
            groups
                .entry((row.key_value.clone(), row.time_shift_group_number))
                .or_default()
                .push(idx);
        }
    }

    let mut dup_pairs = Vec::new();
    let mut resolved_a_ids: Vec<i64> = Vec::new();
    let mut resolved_b_ids: Vec<i64> = Vec::new();

    for indices in groups.values() {
        let a_order = order_side(comb, indices, true);
        let b_order = order_side(comb, indices, false);

        let n = a_order.len().min(b_order.len());
        for k in 0..n {
            let a_id = a_order[k];
            let b_id = b_order[k];
            if let Some(pos) = indices
                .iter()
                .find(|&&idx| comb[idx].a_id == a_id && comb[idx].b_id == b_id)
            {
                comb[*pos].correlation_status_resolved = true;
                comb[*pos].correlation_indicator = true;
                dup_pairs.push(DupPair { a_id, b_id });
                resolved_a_ids.push(a_id);
                resolved_b_ids.push(b_id);
            }
        }
    }

    for entry in org_a.iter_mut() {
        if resolved_a_ids.contains(&entry.row_id) {
            entry.correlation_indicator = true;
        }
    }
    for entry in org_b.iter_mut() {
        if resolved_b_ids.contains(&entry.row_id) {
            entry.correlation_indicator = true;
        }
    }

    dup_pairs
}

/// Order the distinct row ids on one side of a group by
/// `(date, Σ numeric discrepancy, id)`.
fn order_side(comb: &[CombRow], indices: &[usize], side_a: bool) -> Vec<i64> {
    let mut totals: HashMap<i64, (chrono::NaiveDateTime, f64)> = HashMap::new();
    for &idx in indices {
        let row = &comb[idx];
        let id = if side_a { row.a_id } else { row.b_id };
        let date = if side_a { row.date_value_a } else { row.date_value_b };
        let discrepancy_sum: f64 = row.discrepancy_fields.iter().map(|d| d.delta.abs()).sum();
        let entry = totals.entry(id).or_insert((date, 0.0));
        entry.1 += discrepancy_sum;
    }
    let mut ordered: Vec<(i64, chrono::NaiveDateTime, f64)> =
        totals.into_iter().map(|(id, (date, sum))| (id, date, sum)).collect();
    ordered.sort_by(|a, b| {
        a.1.cmp(&b.1)
            .then(a.2.partial_cmp(&b.2).unwrap())
            .then(a.0.cmp(&b.0))
    });
    ordered.into_iter().map(|(id, _, _)| id).collect()
}
