pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
mod events;
pub mod launcher;
pub mod multiplexer;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use catalog::JobCatalog;
pub use config::{CatalogConfig, DisconnectPolicy, StoreConfig};
pub use controller::{RunController, RunHandle, RunOutcome, RunStatus};
pub use events::{JobStatus, Output, RunState};
pub use store::{LogPage, LogStore, RunRecord, RunSummary, StoreError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn basic() {
        let dir = tempfile::tempdir().unwrap();
        test_support::script(dir.path(), "hello.sh", "echo -n hello world!");

        let catalog = JobCatalog::new(&CatalogConfig::new(dir.path())).unwrap();
        let store: Arc<dyn LogStore> = Arc::new(store::SqliteStore::in_memory().unwrap());
        let controller = RunController::new(catalog, store, DisconnectPolicy::default());

        let mut run = controller.start("hello.sh", types::ANONYMOUS);
        let mut output_bytes = vec![];
        while let Some(blob) = run.next_chunk().await {
            output_bytes.extend(blob);
        }
        let transcript = String::from_utf8_lossy(&output_bytes);
        assert!(transcript.contains("by Anonymous"));
        assert!(transcript.contains("\nhello world!\n"));
    }
}
