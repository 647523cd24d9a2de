//! The reconciliation engine: wires the eight pipeline stages into one
//! sequential run over a single catalogue connection.
//!
//! Grounded on `arbitrage/engine.rs::ArbitrageEngine` — a struct holding the
//! shared connection plus a `run`-style method that awaits each stage in
//! turn, logging between them.

pub mod classifier;
pub mod correlator;
pub mod fuzzy;
pub mod organizer;
pub mod source;
pub mod stabilizer;
pub mod writer;

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::config::GlobalConfig;
use crate::error::RapoError;
use crate::model::{ControlConfig, ResultRow, Side};
use crate::process::ProcessId;
use crate::window::{resolve_window, Window};

/// The outcome of one complete run of a control.
#[derive(Debug)]
pub struct EngineRunOutcome {
    pub window: Window,
    pub fetched_a: usize,
    pub fetched_b: usize,
    pub results_a: Vec<ResultRow>,
    pub results_b: Vec<ResultRow>,
    pub written_a: usize,
    pub written_b: usize,
}

/// Runs all eight stages for one control against `now`, materializing
/// temporary relations on `conn` and appending to the control's result
/// tables. Stage order is total: each stage consumes only the previous
/// stage's output.
#[instrument(skip(conn, control), fields(control_id = control.control_id, control = %control.control_name))]
pub fn run_pipeline(
    conn: &Connection,
    control: &ControlConfig,
    now: chrono::NaiveDate,
    process_id: ProcessId,
    global: &GlobalConfig,
) -> Result<EngineRunOutcome, RapoError> {
    // 1. Window Resolver.
    let window = resolve_window(now, control.period_back, control.period_number, control.period_type)?;
    info!(date_from = %window.date_from, date_to = %window.date_to, "window resolved");

    // 2. Source Fetchers.
    let source_a = source::fetch_source(conn, &control.source_a, &window, process_id, Side::A)?;
    let source_b = source::fetch_source(conn, &control.source_b, &window, process_id, Side::B)?;
    info!(a = source_a.len(), b = source_b.len(), "sources fetched");

    // 3. Correlator.
    let mut comb = correlator::correlate(&source_a, &source_b, &control.rule_config, global.normalization_type_default)?;
    info!(candidates = comb.len(), "correlated");

    // 4. Organizer.
    let mut org_a = organizer::organize(&source_a, &comb, Side::A);
    let mut org_b = organizer::organize(&source_b, &comb, Side::B);

    // 5. Fuzzy Duplicate Resolver.
    let fuzzy_optimization = control.rule_config.fuzzy_optimization.unwrap_or(global.fuzzy_optimization_default);
    let dup_pairs = fuzzy::resolve_fuzzy_duplicates(&mut comb, &mut org_a, &mut org_b, fuzzy_optimization);
    info!(dup_pairs = dup_pairs.len(), "fuzzy duplicates resolved");

    // 6. Match Stabilizer.
    let rounds = stabilizer::stabilize(&mut comb, &mut org_a, &mut org_b);
    info!(rounds, "stabilizer converged");

    // 7. Classifier.
    let discrepancy_matching = control.rule_config.discrepancy_matching.unwrap_or(global.discrepancy_matching_default);
    let results_a = classifier::classify_side(
        &source_a,
        &org_a,
        &comb,
        Side::A,
        control.rule_config.need_issues_a,
        control.rule_config.need_recons_a,
        control.rule_config.allow_duplicates,
        discrepancy_matching,
    );
    let results_b = classifier::classify_side(
        &source_b,
        &org_b,
        &comb,
        Side::B,
        control.rule_config.need_issues_b,
        control.rule_config.need_recons_b,
        control.rule_config.allow_duplicates,
        discrepancy_matching,
    );

    // 8. Result Writer.
    let output_limit_a = control.rule_config.output_limit_a.or(control.output_limit);
    let output_limit_b = control.rule_config.output_limit_b.or(control.output_limit);
    let written_a = writer::write_results(conn, &control.control_name, Side::A, &results_a, process_id, output_limit_a)?;
    let written_b = writer::write_results(conn, &control.control_name, Side::B, &results_b, process_id, output_limit_b)?;

    Ok(EngineRunOutcome {
        window,
        fetched_a: source_a.len(),
        fetched_b: source_b.len(),
        results_a,
        results_b,
        written_a,
        written_b,
    })
}
