//! Source Fetchers: materialize `SOURCE_A`/`SOURCE_B`.
//!
//! Grounded on `signals/db_storage.rs`'s schema-then-insert shape (create
//! table if missing, parameterized insert, `tracing` at each step).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::error::RapoError;
use crate::model::{FieldValue, Side, SourceConfig, SourceRecord};
use crate::process::ProcessId;
use crate::sql::emit::source_where_clause;
use crate::window::Window;

fn parse_datetime(text: &str) -> Result<NaiveDateTime, RapoError> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for fmt in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            // Drop fractional seconds: window matching coerces to DATE, but
            // time-shift math still wants 1-second resolution, not sub-second.
            return Ok(dt.with_nanosecond_rounded());
        }
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).unwrap());
    }
    Err(RapoError::ConfigInvalid(format!(
        "unparseable date/timestamp value '{}'",
        text
    )))
}

trait RoundNanos {
    fn with_nanosecond_rounded(self) -> NaiveDateTime;
}

impl RoundNanos for NaiveDateTime {
    fn with_nanosecond_rounded(self) -> NaiveDateTime {
        use chrono::Timelike;
        self.with_nanosecond(0).unwrap_or(self)
    }
}

/// Fetch and materialize one side's windowed, filtered, keyed source
/// relation. Empty results after filtering are legal.
#[instrument(skip(conn, cfg, window), fields(source = %cfg.source_name))]
pub fn fetch_source(
    conn: &Connection,
    cfg: &SourceConfig,
    window: &Window,
    process_id: ProcessId,
    side: Side,
) -> Result<Vec<SourceRecord>, RapoError> {
    let rendered = source_where_clause(&cfg.date_field, window, cfg.filter.as_deref());
    let sql = format!(
        "SELECT rowid AS __rapo_rowid, * FROM {} WHERE {}",
        cfg.source_name, rendered.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(rendered.params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut fields: HashMap<String, FieldValue> = HashMap::new();
        let mut row_id: i64 = 0;
        let mut date_text: Option<String> = None;

        for (idx, name) in column_names.iter().enumerate() {
            let value: FieldValue = row.get(idx)?;
            if name == "__rapo_rowid" {
                row_id = match &value {
                    FieldValue::Int(i) => *i,
                    _ => 0,
                };
                continue;
            }
            if name == &cfg.date_field {
                date_text = Some(value.display());
            }
            fields.insert(name.clone(), value);
        }

        let date_time = parse_datetime(
            date_text
                .as_deref()
                .ok_or_else(|| RapoError::ConfigInvalid(format!("missing date field '{}'", cfg.date_field)))?,
        )?;

        let key_value = match &cfg.key_field {
            Some(col) => fields
                .get(col)
                .map(FieldValue::display)
                .ok_or_else(|| RapoError::ConfigInvalid(format!("missing key field '{}'", col)))?,
            None => row_id.to_string(),
        };
        fields.insert(cfg.key_alias.clone(), FieldValue::Text(key_value.clone()));

        out.push(SourceRecord {
            row_id,
            key_value,
            date_time,
            fields,
        });
    }

    debug!(count = out.len(), "fetched source rows");
    materialize_temp_table(conn, side, process_id, &out)?;
    Ok(out)
}

fn materialize_temp_table(
    conn: &Connection,
    side: Side,
    process_id: ProcessId,
    rows: &[SourceRecord],
) -> Result<(), RapoError> {
    let table = format!("rapo_temp_source_{}_{}", side.as_str(), sanitize(process_id));
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table};
         CREATE TEMP TABLE {table} (
            row_id INTEGER PRIMARY KEY,
            key_value TEXT NOT NULL,
            date_value TEXT NOT NULL,
            data TEXT NOT NULL
         );",
        table = table
    ))?;
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (row_id, key_value, date_value, data) VALUES (?1, ?2, ?3, ?4)",
        table
    ))?;
    for row in rows {
        let data = serde_json::to_string(&row.fields)
            .map_err(|e| RapoError::ConfigInvalid(format!("serializing source row: {}", e)))?;
        stmt.execute(params![
            row.row_id,
            row.key_value,
            row.date_time.to_string(),
            data
        ])?;
    }
    Ok(())
}

fn sanitize(process_id: ProcessId) -> String {
    process_id.simple().to_string()
}

/// Async wrapper dispatching the blocking rusqlite call onto a blocking
/// thread, the way `VaultDb`/`DbSignalStorage` are used from async call
/// sites elsewhere in this crate.
pub async fn fetch_source_async(
    conn: Arc<Mutex<Connection>>,
    cfg: SourceConfig,
    window: Window,
    process_id: ProcessId,
    side: Side,
) -> Result<Vec<SourceRecord>, RapoError> {
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock();
        fetch_source(&guard, &cfg, &window, process_id, side)
    })
    .await
    .map_err(|e| RapoError::Db(format!("join error: {}", e)))?
}
