use super::{
    duration_secs, non_empty, page_bounds, LogPage, LogStore, Result, RunRecord, RunSummary,
    StoreError,
};
use crate::types::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const BODY_EXT: &str = "log";
const META_EXT: &str = "json";

/// Run log kept as `<id>.log` transcripts next to `<id>.json` metadata.
pub struct FileStore {
    dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    id: RunId,
    name: String,
    user: String,
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    status: Option<i32>,
}

impl From<Metadata> for RunSummary {
    fn from(meta: Metadata) -> Self {
        RunSummary {
            duration: meta.end.map(|end| duration_secs(meta.start, end)),
            id: meta.id,
            name: meta.name,
            user: meta.user,
            start: meta.start,
            end: meta.end,
            status: meta.status,
        }
    }
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "using run log directory");
        Ok(Self { dir })
    }

    /// Ids are only ever UUIDs, which also keeps lookups inside `dir`.
    fn checked(&self, id: &RunId) -> Result<()> {
        Uuid::parse_str(id)
            .map(|_| ())
            .map_err(|_| StoreError::NotFound(id.clone()))
    }

    fn path(&self, id: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{id}.{ext}"))
    }

    fn read_meta(&self, id: &RunId) -> Result<Metadata> {
        self.checked(id)?;
        let raw = fs::read(self.path(id, META_EXT)).map_err(|err| not_found_or(err, id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write_meta(&self, meta: &Metadata) -> Result<()> {
        let target = self.path(&meta.id, META_EXT);
        // rename so readers never see a torn sidecar
        let tmp = self.path(&meta.id, "json.tmp");
        fs::write(&tmp, serde_json::to_vec(meta)?)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

fn not_found_or(err: io::Error, id: &RunId) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(id.clone())
    } else {
        StoreError::Io(err)
    }
}

impl LogStore for FileStore {
    fn create(&self, job_name: &str, user: &str, start: DateTime<Utc>) -> Result<RunId> {
        let id = Uuid::new_v4().to_string();
        fs::File::create(self.path(&id, BODY_EXT))?;
        self.write_meta(&Metadata {
            id: id.clone(),
            name: job_name.to_string(),
            user: user.to_string(),
            start,
            end: None,
            status: None,
        })?;
        Ok(id)
    }

    fn append(&self, id: &RunId, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.checked(id)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.path(id, BODY_EXT))
            .map_err(|err| not_found_or(err, id))?;
        file.write_all(chunk)?;
        Ok(())
    }

    fn finalize(&self, id: &RunId, end: DateTime<Utc>, status: i32) -> Result<()> {
        let mut meta = self.read_meta(id)?;
        meta.end = Some(end);
        meta.status = Some(status);
        self.write_meta(&meta)
    }

    fn get(&self, id: &RunId) -> Result<RunRecord> {
        let meta = self.read_meta(id)?;
        let body = fs::read(self.path(id, BODY_EXT)).map_err(|err| not_found_or(err, id))?;
        Ok(RunRecord {
            summary: meta.into(),
            body,
        })
    }

    fn list(&self, job_filter: Option<&str>, page: usize, page_size: usize) -> Result<LogPage> {
        let job = non_empty(job_filter);
        let mut entries: Vec<RunSummary> = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXT) {
                continue;
            }
            let meta: Metadata = match fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|raw| Ok(serde_json::from_slice::<Metadata>(&raw)?))
            {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable log metadata");
                    continue;
                }
            };
            if job.map_or(true, |job| meta.name == job) {
                entries.push(meta.into());
            }
        }

        entries.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| b.id.cmp(&a.id)));
        let length = entries.len();
        let bounds = page_bounds(length, page, page_size);
        let entries = entries.drain(bounds).collect();
        Ok(LogPage { entries, length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_pagination, exercise_store, whole_seconds};

    #[test]
    fn shared_behaviour() {
        let dir = tempfile::tempdir().unwrap();
        exercise_store(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn pagination() {
        let dir = tempfile::tempdir().unwrap();
        exercise_pagination(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn finalize_keeps_the_same_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store.create("build.sh", "erin", whole_seconds(0)).unwrap();
        store.append(&id, b"output").unwrap();
        store.finalize(&id, whole_seconds(3), 1).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![format!("{id}.json"), format!("{id}.log")]);

        let record = store.get(&id).unwrap();
        assert_eq!(record.summary.status, Some(1));
        assert_eq!(record.summary.duration, Some(3.0));
        assert_eq!(record.body, b"output");
    }

    #[test]
    fn names_with_dashes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = store
            .create("deploy-prod.sh", "first-last", whole_seconds(0))
            .unwrap();
        let summary = store.get(&id).unwrap().summary;
        assert_eq!(summary.name, "deploy-prod.sh");
        assert_eq!(summary.user, "first-last");
    }

    #[test]
    fn rejects_ids_outside_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for id in ["../etc/passwd", "", "not-a-uuid"] {
            let id = id.to_string();
            assert!(matches!(store.get(&id), Err(StoreError::NotFound(_))));
            assert!(matches!(store.append(&id, b"x"), Err(StoreError::NotFound(_))));
        }
        let unknown = Uuid::new_v4().to_string();
        assert!(matches!(store.get(&unknown), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn listing_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.create("build.sh", "erin", whole_seconds(0)).unwrap();
        fs::write(dir.path().join("README"), "not a log").unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let page = store.list(None, 0, 50).unwrap();
        assert_eq!(page.length, 1);
        assert_eq!(page.entries[0].name, "build.sh");
    }
}
