//! `CONFIG`/`LOG` catalogue access: the only shared mutable state; every
//! write is a small transaction.
//!
//! Grounded on `vault/vault_db.rs::VaultDb`: a pooled `Arc<Mutex<Connection>>`
//! wrapper that creates its tables with `CREATE TABLE IF NOT EXISTS` on
//! construction and exposes narrow, transactional methods.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::RapoError;
use crate::process::{ProcessId, ProcessStatus, RunLog};

/// Shared handle to the catalogue database. Cheap to clone; every clone
/// points at the same pooled connection.
#[derive(Clone)]
pub struct Catalogue {
    conn: Arc<Mutex<Connection>>,
}

impl Catalogue {
    pub fn open(path: &str) -> Result<Self, RapoError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        let cat = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cat.init_schema()?;
        Ok(cat)
    }

    pub fn open_in_memory() -> Result<Self, RapoError> {
        let conn = Connection::open_in_memory()?;
        let cat = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cat.init_schema()?;
        Ok(cat)
    }

    fn init_schema(&self) -> Result<(), RapoError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rapo_log (
                process_id TEXT PRIMARY KEY,
                control_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                fetched_number_a INTEGER NOT NULL DEFAULT 0,
                fetched_number_b INTEGER NOT NULL DEFAULT 0,
                success_number_a INTEGER NOT NULL DEFAULT 0,
                success_number_b INTEGER NOT NULL DEFAULT 0,
                error_number_a INTEGER NOT NULL DEFAULT 0,
                error_number_b INTEGER NOT NULL DEFAULT 0,
                text_log TEXT,
                text_error TEXT,
                text_message TEXT,
                date_from TEXT,
                date_to TEXT,
                start_date TEXT NOT NULL,
                end_date TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_rapo_log_control ON rapo_log(control_id, status);",
        )?;
        Ok(())
    }

    /// Count of non-terminal runs for a control (used to enforce
    /// `instance_limit`).
    pub fn active_run_count(&self, control_id: i64) -> Result<usize, RapoError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rapo_log WHERE control_id = ?1 AND status NOT IN ('D', 'E', 'C')",
            params![control_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn insert(&self, log: &RunLog) -> Result<(), RapoError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rapo_log (process_id, control_id, status, start_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                log.process_id.to_string(),
                log.control_id,
                log.status.code(),
                log.start_date.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, log: &RunLog) -> Result<(), RapoError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE rapo_log SET
                status = ?1,
                fetched_number_a = ?2, fetched_number_b = ?3,
                success_number_a = ?4, success_number_b = ?5,
                error_number_a = ?6, error_number_b = ?7,
                text_log = ?8, text_error = ?9, text_message = ?10,
                date_from = ?11, date_to = ?12, end_date = ?13
             WHERE process_id = ?14",
            params![
                log.status.code(),
                log.fetched_number_a,
                log.fetched_number_b,
                log.success_number_a,
                log.success_number_b,
                log.error_number_a,
                log.error_number_b,
                log.text_log.join("\n"),
                log.text_error,
                log.text_message,
                log.date_from.map(|d| d.to_string()),
                log.date_to.map(|d| d.to_string()),
                log.end_date.map(|d| d.to_string()),
                log.process_id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn status_of(&self, process_id: ProcessId) -> Result<Option<ProcessStatus>, RapoError> {
        let conn = self.conn.lock();
        let code: Option<String> = conn
            .query_row(
                "SELECT status FROM rapo_log WHERE process_id = ?1",
                params![process_id.to_string()],
                |row| row.get(0),
            )
            .ok();
        Ok(code.and_then(|c| match c.as_str() {
            "A" => Some(ProcessStatus::Added),
            "Q" => Some(ProcessStatus::Waiting),
            "S" => Some(ProcessStatus::Started),
            "P" => Some(ProcessStatus::Progress),
            "D" => Some(ProcessStatus::Done),
            "E" => Some(ProcessStatus::Error),
            "C" => Some(ProcessStatus::Cancelled),
            _ => None,
        }))
    }

    /// Access to the pooled connection for stages that need to materialize
    /// temporary relations or write result tables directly.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}
