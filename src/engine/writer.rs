//! Result Writer: appends the Classifier's per-side rows
//! (Loss/Duplicate/Discrepancy, plus Success when `need_recons` asked for
//! it — the `ERROR_{A,B}`/`STAGE_{A,B}` split is just which of those the
//! Classifier included) into the per-control result tables, creating them
//! on first write.
//!
//! Grounded on `vault/vault_db.rs`'s append-only writers: `CREATE TABLE IF
//! NOT EXISTS` followed by a batch of parameterized `INSERT`s inside one
//! transaction.

use rusqlite::{params, Connection};
use tracing::{info, instrument};

use crate::error::RapoError;
use crate::model::{ResultRow, ResultType, Side};
use crate::process::ProcessId;

fn result_table_name(control_name: &str, side: Side) -> String {
    format!("rapo_res{}_{}", side.as_str(), control_name)
}

fn ensure_result_table(conn: &Connection, table: &str) -> Result<(), RapoError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            row_id INTEGER NOT NULL,
            key_value TEXT NOT NULL,
            date_value TEXT NOT NULL,
            rapo_result_type TEXT NOT NULL,
            rapo_discrepancy_id INTEGER,
            rapo_discrepancy_description TEXT,
            rapo_process_id TEXT NOT NULL
         );",
        table = table
    ))?;
    Ok(())
}

/// Writes one side's classified rows to its result table, truncating ERROR
/// rows to `output_limit` after ordering by `(date, key)`.
#[instrument(skip(conn, rows), fields(control = control_name, side = side.as_str(), rows = rows.len()))]
pub fn write_results(
    conn: &Connection,
    control_name: &str,
    side: Side,
    rows: &[ResultRow],
    process_id: ProcessId,
    output_limit: Option<usize>,
) -> Result<usize, RapoError> {
    let table = result_table_name(control_name, side);
    ensure_result_table(conn, &table)?;

    let mut ordered: Vec<&ResultRow> = rows.iter().collect();
    ordered.sort_by(|a, b| a.date_time.cmp(&b.date_time).then(a.key_value.cmp(&b.key_value)));

    if let Some(limit) = output_limit {
        let mut kept = Vec::new();
        let mut error_count = 0usize;
        for row in ordered {
            if row.result_type.is_error() {
                if error_count >= limit {
                    continue;
                }
                error_count += 1;
            }
            kept.push(row);
        }
        ordered = kept;
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (row_id, key_value, date_value, rapo_result_type, rapo_discrepancy_id, rapo_discrepancy_description, rapo_process_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            table
        ))?;
        for row in &ordered {
            stmt.execute(params![
                row.row_id,
                row.key_value,
                row.date_time.to_string(),
                row.result_type.as_str(),
                row.discrepancy_id,
                row.discrepancy_description,
                process_id.to_string(),
            ])?;
        }
    }
    tx.commit()?;

    info!(written = ordered.len(), "wrote result rows");
    Ok(ordered.len())
}
