//! Durable run records: metadata plus the full output transcript.
//!
//! Two backends implement [`LogStore`]:
//! - [`SqliteStore`]: one `log` table keyed by an auto-increment id.
//! - [`FileStore`]: a directory of `<id>.log` bodies with `<id>.json` metadata
//!   sidecars.
//!
//! Both hand out one opaque [`RunId`] at `create` that stays valid for the
//! whole life of the record, before and after `finalize`.

mod flatfile;
mod sqlite;

pub use flatfile::FileStore;
pub use sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::types::RunId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::{io, result};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("log entry not found: {0}")]
    NotFound(RunId),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("log file error: {0}")]
    Io(#[from] io::Error),
    #[error("log metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("corrupt log entry: {0}")]
    Corrupt(String),
    #[error("log store task failed: {0}")]
    Task(String),
}

pub type Result<T> = result::Result<T, StoreError>;

/// Metadata of one run, as shown in listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: RunId,
    pub name: String,
    pub user: String,
    pub start: DateTime<Utc>,
    /// Unset while the run is open.
    pub end: Option<DateTime<Utc>>,
    /// Seconds between start and end, unset while the run is open.
    pub duration: Option<f64>,
    /// Unset while the run is open.
    pub status: Option<i32>,
}

impl RunSummary {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// A run with its transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub summary: RunSummary,
    pub body: Vec<u8>,
}

/// One page of a listing plus the number of runs matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage {
    pub entries: Vec<RunSummary>,
    pub length: usize,
}

/// Persistence for runs. Blocking; async callers go through [`blocking`].
pub trait LogStore: Send + Sync {
    /// Persist a new open run and return its id.
    fn create(&self, job_name: &str, user: &str, start: DateTime<Utc>) -> Result<RunId>;

    /// Add `chunk` to the end of the run's body. Empty chunks are ignored.
    fn append(&self, id: &RunId, chunk: &[u8]) -> Result<()>;

    /// Close the run, recording its end time and exit status. Never touches the body.
    fn finalize(&self, id: &RunId, end: DateTime<Utc>, status: i32) -> Result<()>;

    fn get(&self, id: &RunId) -> Result<RunRecord>;

    /// Runs ordered by start time, most recent first, optionally restricted to
    /// one job name. Pages past the end are empty, never an error.
    fn list(&self, job_filter: Option<&str>, page: usize, page_size: usize) -> Result<LogPage>;
}

/// Open the backend named by `config`, creating its schema or directory.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn LogStore>> {
    Ok(match config {
        StoreConfig::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
        StoreConfig::Files { dir } => Arc::new(FileStore::open(dir)?),
    })
}

/// Run a store operation on the blocking thread pool.
pub async fn blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
}

/// Index range of `page` within `total` entries, clamped to `0..total`.
pub fn page_bounds(total: usize, page: usize, page_size: usize) -> Range<usize> {
    let start = page.saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);
    start..end
}

pub(crate) fn duration_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// an empty filter means all jobs
pub(crate) fn non_empty(job_filter: Option<&str>) -> Option<&str> {
    job_filter.filter(|job| !job.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // whole seconds survive every backend's encoding
    pub(crate) fn whole_seconds(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(Utc::now().timestamp() + offset_secs, 0)
            .unwrap()
    }

    #[test]
    fn page_bounds_clamps_both_ends() {
        assert_eq!(page_bounds(120, 0, 50), 0..50);
        assert_eq!(page_bounds(120, 1, 50), 50..100);
        assert_eq!(page_bounds(120, 2, 50), 100..120);
        assert_eq!(page_bounds(120, 3, 50), 120..120);
        assert_eq!(page_bounds(120, usize::MAX, 50), 120..120);
        assert_eq!(page_bounds(0, 0, 50), 0..0);
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        let start = Utc::now();
        let end = start - chrono::Duration::seconds(5);
        assert_eq!(duration_secs(start, end), 0.0);
        assert_eq!(
            duration_secs(start, start + chrono::Duration::milliseconds(1500)),
            1.5
        );
    }

    pub(crate) fn exercise_store(store: &dyn LogStore) {
        let start = whole_seconds(0);
        let id = store.create("deploy.sh", "alice", start).unwrap();

        let open = store.get(&id).unwrap();
        assert!(open.summary.is_open());
        assert_eq!(open.summary.status, None);
        assert!(open.body.is_empty());

        for chunk in [&b"a"[..], b"", b"b", b"c"] {
            store.append(&id, chunk).unwrap();
        }
        store
            .finalize(&id, start + chrono::Duration::seconds(2), 0)
            .unwrap();

        let closed = store.get(&id).unwrap();
        assert_eq!(closed.body, b"abc");
        assert_eq!(closed.summary.id, id);
        assert_eq!(closed.summary.name, "deploy.sh");
        assert_eq!(closed.summary.user, "alice");
        assert_eq!(closed.summary.status, Some(0));
        assert_eq!(closed.summary.duration, Some(2.0));
        assert!(!closed.summary.is_open());

        let missing = "does-not-exist".to_string();
        assert!(matches!(store.get(&missing), Err(StoreError::NotFound(_))));
    }

    pub(crate) fn exercise_pagination(store: &dyn LogStore) {
        let base = whole_seconds(-86_400);
        for i in 0..120i64 {
            let job = if i % 3 == 0 { "build.sh" } else { "deploy.sh" };
            store
                .create(job, "bob", base + chrono::Duration::seconds(i))
                .unwrap();
        }

        let first = store.list(None, 0, 50).unwrap();
        assert_eq!(first.length, 120);
        assert_eq!(first.entries.len(), 50);
        assert_eq!(first.entries[0].start, base + chrono::Duration::seconds(119));
        assert!(first
            .entries
            .windows(2)
            .all(|pair| pair[0].start > pair[1].start));

        let third = store.list(Some(""), 2, 50).unwrap();
        assert_eq!(third.entries.len(), 20);
        assert_eq!(third.entries[0].start, base + chrono::Duration::seconds(19));
        assert_eq!(third.entries[19].start, base);

        let beyond = store.list(None, 7, 50).unwrap();
        assert!(beyond.entries.is_empty());
        assert_eq!(beyond.length, 120);

        let builds = store.list(Some("build.sh"), 0, 50).unwrap();
        assert_eq!(builds.length, 40);
        assert!(builds.entries.iter().all(|e| e.name == "build.sh"));
    }
}
