//! Organizer: collapses `COMB` into one entry per source row per side
//! (`ORG_A`/`ORG_B`), picking the best `correlation_type` a row
//! participated in and carrying forward whether it is already resolved.
//!
//! Grounded on the aggregation half of `signals/correlator.rs`'s
//! group-then-classify shape: COMB is the per-pair detail, ORG is the
//! per-row summary `fold`ed out of it.

use std::collections::HashMap;

use tracing::instrument;

use crate::model::{CombRow, OrgEntry, Side, SourceRecord};

/// Build `ORG_A` (or `ORG_B`) from every source row on that side plus the
/// candidate pairs it appears in. Rows with no candidate at all still get an
/// entry with `correlation_type = None` — the Classifier turns those into
/// Losses.
#[instrument(skip_all, fields(side = side.as_str(), rows = source.len(), comb = comb.len()))]
pub fn organize(source: &[SourceRecord], comb: &[CombRow], side: Side) -> Vec<OrgEntry> {
    let mut best: HashMap<i64, OrgEntry> = HashMap::new();

    for row in source {
        best.insert(
            row.row_id,
            OrgEntry {
                row_id: row.row_id,
                key_value: row.key_value.clone(),
                correlation_type: None,
                correlation_indicator: false,
            },
        );
    }

    for pair in comb {
        let id = match side {
            Side::A => pair.a_id,
            Side::B => pair.b_id,
        };
        let Some(entry) = best.get_mut(&id) else {
            continue;
        };
        entry.correlation_indicator = entry.correlation_indicator || pair.correlation_indicator;
        entry.correlation_type = Some(match entry.correlation_type {
            None => pair.correlation_type,
            Some(existing) => crate::model::CorrelationType::best_of(existing, pair.correlation_type),
        });
    }

    let mut out: Vec<OrgEntry> = best.into_values().collect();
    out.sort_by_key(|e| e.row_id);
    out
}
