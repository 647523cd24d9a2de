//! Error kinds for the reconciliation engine.
//!
//! Grounded on `backtest_v2/settlement_integration.rs`'s `SettlementError`:
//! a plain enum with a hand-written `Display`/`Error` impl, no `thiserror`.

use std::fmt;

/// Every kind is fatal to the run that raised it: the run transitions to
/// `ProcessStatus::Error` and temporary relations are cleaned up.
#[derive(Debug, Clone)]
pub enum RapoError {
    /// Malformed rule_config, unknown period_type, unknown normalization_type,
    /// empty correlation_config.
    ConfigInvalid(String),
    /// `prerequisite_sql` returned 0 or `prerun_hook` returned a non-null code.
    PrerequisiteFailed(String),
    /// Correlator step estimated more candidate pairs than `correlation_limit`
    /// allows.
    CorrelationLimitExceeded { candidates: u64, limit: u64 },
    /// A new run was refused because `instance_limit` non-terminal runs for
    /// `control_id` are already active.
    InstanceLimitReached { control_id: i64, limit: usize },
    /// The underlying database rejected a statement; wraps the driver error
    /// text verbatim.
    Db(String),
    /// Only raised on the asynchronous `launch()` path.
    Timeout,
    /// The run was cancelled between stage boundaries.
    Canceled,
}

impl fmt::Display for RapoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigInvalid(msg) => write!(f, "invalid control configuration: {}", msg),
            Self::PrerequisiteFailed(msg) => write!(f, "prerequisite failed: {}", msg),
            Self::CorrelationLimitExceeded { candidates, limit } => write!(
                f,
                "correlation limit exceeded: {} candidate pairs over limit {}",
                candidates, limit
            ),
            Self::InstanceLimitReached { control_id, limit } => write!(
                f,
                "instance limit reached for control {}: {} concurrent runs already active",
                control_id, limit
            ),
            Self::Db(msg) => write!(f, "database error: {}", msg),
            Self::Timeout => write!(f, "run timed out"),
            Self::Canceled => write!(f, "run was cancelled"),
        }
    }
}

impl std::error::Error for RapoError {}

impl From<rusqlite::Error> for RapoError {
    fn from(e: rusqlite::Error) -> Self {
        RapoError::Db(e.to_string())
    }
}
