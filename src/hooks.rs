//! External collaborator hooks: `prerun_hook` / `postrun_hook`. Out of
//! scope as a feature surface, but the engine needs a seam to call into
//! one, so it is modeled as a trait with a no-op default.

use async_trait::async_trait;

use crate::process::ProcessId;

#[async_trait]
pub trait Hooks: Send + Sync {
    /// Non-`None` return aborts the run with the returned code
    /// (`RapoError::PrerequisiteFailed`).
    async fn prerun(&self, _process_id: ProcessId) -> Option<String> {
        None
    }

    /// Fired after the run reaches a terminal state.
    async fn postrun(&self, _process_id: ProcessId) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl Hooks for NoopHooks {}
