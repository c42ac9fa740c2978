use super::{
    duration_secs, non_empty, page_bounds, LogPage, LogStore, Result, RunRecord, RunSummary,
    StoreError,
};
use crate::types::RunId;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA_SQL: &str = include_str!("../../schema/log.sql");

const SUMMARY_COLUMNS: &str = "id, name, user, start_dt, end_dt, status";

/// Run log kept in a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories and
    /// the schema as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(path = %path.display(), "opening run log database");
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic mid-statement leaves the connection itself usable
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn row_id(id: &RunId) -> Result<i64> {
    id.parse().map_err(|_| StoreError::NotFound(id.clone()))
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("bad timestamp {s:?}: {err}")))
}

struct SummaryRow {
    id: i64,
    name: String,
    user: String,
    start: String,
    end: Option<String>,
    status: Option<i32>,
}

impl SummaryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            user: row.get(2)?,
            start: row.get(3)?,
            end: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn into_summary(self) -> Result<RunSummary> {
        let start = decode_time(&self.start)?;
        let end = self.end.as_deref().map(decode_time).transpose()?;
        Ok(RunSummary {
            id: self.id.to_string(),
            name: self.name,
            user: self.user,
            start,
            end,
            duration: end.map(|end| duration_secs(start, end)),
            status: self.status,
        })
    }
}

impl LogStore for SqliteStore {
    fn create(&self, job_name: &str, user: &str, start: DateTime<Utc>) -> Result<RunId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO log (name, user, start_dt) VALUES (?1, ?2, ?3)",
            params![job_name, user, encode_time(start)],
        )?;
        Ok(conn.last_insert_rowid().to_string())
    }

    fn append(&self, id: &RunId, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let row = row_id(id)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut body: Vec<u8> = tx
            .query_row("SELECT body FROM log WHERE id = ?1", params![row], |r| r.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        body.extend_from_slice(chunk);
        tx.execute("UPDATE log SET body = ?1 WHERE id = ?2", params![body, row])?;
        tx.commit()?;
        Ok(())
    }

    fn finalize(&self, id: &RunId, end: DateTime<Utc>, status: i32) -> Result<()> {
        let row = row_id(id)?;
        let updated = self.conn().execute(
            "UPDATE log SET end_dt = ?1, status = ?2 WHERE id = ?3",
            params![encode_time(end), status, row],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn get(&self, id: &RunId) -> Result<RunRecord> {
        let row = row_id(id)?;
        let found = self
            .conn()
            .query_row(
                &format!("SELECT {SUMMARY_COLUMNS}, body FROM log WHERE id = ?1"),
                params![row],
                |r| Ok((SummaryRow::from_row(r)?, r.get::<_, Vec<u8>>(6)?)),
            )
            .optional()?;
        let (summary, body) = found.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(RunRecord {
            summary: summary.into_summary()?,
            body,
        })
    }

    fn list(&self, job_filter: Option<&str>, page: usize, page_size: usize) -> Result<LogPage> {
        let job = non_empty(job_filter);
        let conn = self.conn();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM log WHERE ?1 IS NULL OR name = ?1",
            params![job],
            |r| r.get(0),
        )?;
        let total = total.max(0) as usize;
        let bounds = page_bounds(total, page, page_size);
        if bounds.is_empty() {
            return Ok(LogPage {
                entries: Vec::new(),
                length: total,
            });
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM log
             WHERE ?1 IS NULL OR name = ?1
             ORDER BY start_dt DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![job, bounds.len() as i64, bounds.start as i64],
            SummaryRow::from_row,
        )?;

        let mut entries = Vec::with_capacity(bounds.len());
        for row in rows {
            entries.push(row?.into_summary()?);
        }
        Ok(LogPage {
            entries,
            length: total,
        })
    }
}
