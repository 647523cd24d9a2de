//! Process state machine and run log row.
//!
//! Grounded on `vault/vault_db.rs`'s record structs (`VaultActivityRecord`,
//! `VaultNavSnapshotRecord`): plain `Serialize`/`Deserialize` rows mirroring
//! a SQL table, constructed with a `new`/`started` style helper.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProcessId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Added,
    Waiting,
    Started,
    Progress,
    Done,
    Error,
    Cancelled,
}

impl ProcessStatus {
    /// The single-letter status code (`Q`, `S`, `P`, `D`, `E`, `C`).
    pub fn code(self) -> &'static str {
        match self {
            ProcessStatus::Added => "A",
            ProcessStatus::Waiting => "Q",
            ProcessStatus::Started => "S",
            ProcessStatus::Progress => "P",
            ProcessStatus::Done => "D",
            ProcessStatus::Error => "E",
            ProcessStatus::Cancelled => "C",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Done | ProcessStatus::Error | ProcessStatus::Cancelled
        )
    }
}

/// A `LOG` table row: per-run status and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub process_id: ProcessId,
    pub control_id: i64,
    pub status: ProcessStatus,
    pub fetched_number_a: i64,
    pub fetched_number_b: i64,
    pub success_number_a: i64,
    pub success_number_b: i64,
    pub error_number_a: i64,
    pub error_number_b: i64,
    /// Result of `prerequisite_sql`; always `None` here since that query
    /// runs outside the core.
    pub prerequisite_value: Option<i64>,
    pub text_log: Vec<String>,
    pub text_error: Option<String>,
    pub text_message: Option<String>,
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
}

impl RunLog {
    pub fn started(control_id: i64) -> Self {
        Self {
            process_id: Uuid::new_v4(),
            control_id,
            status: ProcessStatus::Added,
            fetched_number_a: 0,
            fetched_number_b: 0,
            success_number_a: 0,
            success_number_b: 0,
            error_number_a: 0,
            error_number_b: 0,
            prerequisite_value: None,
            text_log: Vec::new(),
            text_error: None,
            text_message: None,
            date_from: None,
            date_to: None,
            start_date: Utc::now().naive_utc(),
            end_date: None,
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.text_log.push(message.into());
    }

    pub fn finish(&mut self, status: ProcessStatus) {
        self.status = status;
        self.end_date = Some(Utc::now().naive_utc());
    }
}
