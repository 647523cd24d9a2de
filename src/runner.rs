//! Orchestration surface: `run_control` (synchronous, ignores
//! `timeout`) and `launch_control` (async, honors `timeout` and
//! `instance_limit`), plus sequential iteration execution.
//!
//! Grounded on `main.rs`'s background-task polling loop: a small in-process
//! counter guarding concurrent work, `tokio::time::timeout` wrapping the
//! awaited future, and `tracing` at each transition.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{error, info, instrument, warn};

use crate::catalogue::Catalogue;
use crate::config::GlobalConfig;
use crate::control::Control;
use crate::engine::EngineRunOutcome;
use crate::error::RapoError;
use crate::hooks::Hooks;
use crate::model::ControlConfig;
use crate::process::{ProcessId, ProcessStatus, RunLog};

/// The observable outcome of `run_control`/`launch_control`: the run log
/// row plus the engine's result, if the pipeline reached completion.
#[derive(Debug)]
pub struct RunOutcome {
    pub log: RunLog,
    pub result: Option<EngineRunOutcome>,
}

/// Tracks active (non-terminal) runs per `control_id` in-process, so
/// `launch_control` can enforce `instance_limit` without a round-trip to the
/// catalogue on the hot path.
#[derive(Default, Clone)]
pub struct InstanceTracker {
    active: Arc<Mutex<HashMap<i64, usize>>>,
}

impl InstanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, control_id: i64, limit: usize) -> bool {
        let mut active = self.active.lock();
        let count = active.entry(control_id).or_insert(0);
        if *count >= limit {
            return false;
        }
        *count += 1;
        true
    }

    fn release(&self, control_id: i64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&control_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Synchronous entry point: `timeout` is ignored — synchronous `run()`
/// invocations always run to completion. `instance_limit` is still
/// checked against the catalogue's own non-terminal run count.
#[instrument(skip(conn, catalogue, control, hooks, global), fields(control_id = control.control_id))]
pub fn run_control(
    conn: &Connection,
    catalogue: &Catalogue,
    control: &ControlConfig,
    control_impl: &dyn Control,
    hooks: &dyn Hooks,
    global: &GlobalConfig,
) -> Result<RunOutcome, RapoError> {
    let active = catalogue.active_run_count(control.control_id)?;
    if active >= control.instance_limit {
        return Err(RapoError::InstanceLimitReached {
            control_id: control.control_id,
            limit: control.instance_limit,
        });
    }

    let mut log = RunLog::started(control.control_id);
    catalogue.insert(&log)?;
    log.status = ProcessStatus::Started;
    catalogue.update(&log)?;

    let outcome = execute_once(conn, control, control_impl, hooks, global, log.process_id);

    match outcome {
        Ok(result) => {
            log.fetched_number_a = result.fetched_a as i64;
            log.fetched_number_b = result.fetched_b as i64;
            log.success_number_a = result.results_a.iter().filter(|r| !r.result_type.is_error()).count() as i64;
            log.success_number_b = result.results_b.iter().filter(|r| !r.result_type.is_error()).count() as i64;
            log.error_number_a = result.results_a.iter().filter(|r| r.result_type.is_error()).count() as i64;
            log.error_number_b = result.results_b.iter().filter(|r| r.result_type.is_error()).count() as i64;
            log.date_from = Some(result.window.date_from.and_hms_opt(0, 0, 0).unwrap());
            log.date_to = Some(result.window.date_to.and_hms_opt(0, 0, 0).unwrap());
            log.finish(ProcessStatus::Done);
            catalogue.update(&log)?;
            info!(process_id = %log.process_id, "run completed");
            run_iterations(conn, control, control_impl, hooks, global, catalogue);
            Ok(RunOutcome { log, result: Some(result) })
        }
        Err(e) => {
            // prerequisite_sql/prerun_hook failures carry their text in
            // text_message; every other kind carries it in text_error.
            if let RapoError::PrerequisiteFailed(ref code) = e {
                log.text_message = Some(code.clone());
            } else {
                log.text_error = Some(e.to_string());
            }
            log.finish(if matches!(e, RapoError::Timeout | RapoError::Canceled) {
                ProcessStatus::Cancelled
            } else {
                ProcessStatus::Error
            });
            catalogue.update(&log)?;
            error!(process_id = %log.process_id, error = %e, "run failed");
            Err(e)
        }
    }
}

/// Asynchronous entry point: honors `timeout` (if configured) and bounds
/// concurrent runs for `control_id` via `tracker` before even touching the
/// catalogue.
#[instrument(skip(conn, catalogue, control, control_impl, hooks, global, tracker), fields(control_id = control.control_id))]
pub async fn launch_control(
    conn: Arc<Mutex<Connection>>,
    catalogue: Catalogue,
    control: ControlConfig,
    control_impl: Arc<dyn Control + Send + Sync>,
    hooks: Arc<dyn Hooks + Send + Sync>,
    global: GlobalConfig,
    tracker: InstanceTracker,
) -> Result<RunOutcome, RapoError> {
    let control_id = control.control_id;
    if !tracker.try_acquire(control_id, control.instance_limit) {
        return Err(RapoError::InstanceLimitReached {
            control_id,
            limit: control.instance_limit,
        });
    }

    let timeout_secs = control.timeout_secs;
    let result = tokio::task::spawn_blocking(move || {
        let guard = conn.lock();
        run_control(&guard, &catalogue, &control, control_impl.as_ref(), hooks.as_ref(), &global)
    });

    let outcome = match timeout_secs {
        Some(secs) => match tokio::time::timeout(std::time::Duration::from_secs(secs), result).await {
            Ok(joined) => joined.map_err(|e| RapoError::Db(format!("join error: {}", e)))?,
            Err(_) => Err(RapoError::Timeout),
        },
        None => result.await.map_err(|e| RapoError::Db(format!("join error: {}", e)))?,
    };

    tracker.release(control_id);
    outcome
}

fn execute_once(
    conn: &Connection,
    control: &ControlConfig,
    control_impl: &dyn Control,
    hooks: &dyn Hooks,
    global: &GlobalConfig,
    process_id: ProcessId,
) -> Result<EngineRunOutcome, RapoError> {
    if let Some(code) = block_on_hook(hooks.prerun(process_id)) {
        return Err(RapoError::PrerequisiteFailed(code));
    }
    let now = Utc::now().date_naive();
    let outcome = control_impl.run(conn, control, now, process_id, global);
    block_on_hook(hooks.postrun(process_id));
    outcome
}

/// `run_control` is a synchronous entry point, but `Hooks` is async (it may
/// do network I/O). A throwaway current-thread runtime bridges the two —
/// the same `spawn_blocking`-adjacent bridging used elsewhere to call
/// blocking `rusqlite` code from async call sites, just inverted.
fn block_on_hook<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("building throwaway runtime for hook dispatch")
        .block_on(fut)
}

/// Runs every configured iteration sequentially as an independent
/// `process_id`; a failed iteration is logged and does not abort the rest.
fn run_iterations(
    conn: &Connection,
    control: &ControlConfig,
    control_impl: &dyn Control,
    hooks: &dyn Hooks,
    global: &GlobalConfig,
    catalogue: &Catalogue,
) {
    for iteration in &control.iteration_config {
        if !iteration.enabled {
            continue;
        }
        let mut iter_control = control.clone();
        iter_control.period_back = iteration.period_back;
        iter_control.period_number = iteration.period_number;
        iter_control.period_type = iteration.period_type;

        let mut log = RunLog::started(control.control_id);
        if catalogue.insert(&log).is_err() {
            continue;
        }
        match execute_once(conn, &iter_control, control_impl, hooks, global, log.process_id) {
            Ok(_) => {
                log.finish(ProcessStatus::Done);
            }
            Err(e) => {
                warn!(error = %e, "iteration failed, continuing with remaining iterations");
                log.text_error = Some(e.to_string());
                log.finish(ProcessStatus::Error);
            }
        }
        let _ = catalogue.update(&log);
    }
}
