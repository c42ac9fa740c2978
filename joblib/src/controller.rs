mod driver;
pub mod transcript;

use self::driver::Driver;
use crate::catalog::JobCatalog;
use crate::config::DisconnectPolicy;
use crate::events::{JobStatus, RunState};
use crate::store::LogStore;
use crate::types::{OutputBlob, RunId, FAILED_TO_START};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tracing::Instrument;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// The process ran and was reaped.
    Finished(JobStatus),
    /// The job name is not in the catalog.
    NotFound,
    /// The catalog could not be read or the process could not be spawned.
    LaunchFailed,
    /// The process ran but its exit status could not be collected.
    WaitFailed,
}

impl RunStatus {
    /// The status recorded in the log store.
    pub fn exit_status(&self) -> i32 {
        match self {
            RunStatus::Finished(status) => status.exit_status(),
            RunStatus::NotFound | RunStatus::LaunchFailed | RunStatus::WaitFailed => {
                FAILED_TO_START
            }
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Finished(status) => write!(f, "{}", status),
            RunStatus::NotFound => write!(f, "exit status {} (job not found)", FAILED_TO_START),
            RunStatus::LaunchFailed => write!(f, "exit status {} (failed to start)", FAILED_TO_START),
            RunStatus::WaitFailed => write!(f, "exit status {} (status unknown)", FAILED_TO_START),
        }
    }
}

/// Reported once a run has been finalized and the run lock released.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    /// `None` if the log store could not create a record for the run.
    pub id: Option<RunId>,
    pub status: RunStatus,
    pub duration: Duration,
    /// Whether the log store accepted the final status.
    pub recorded: bool,
}

/// Runs one job at a time. Clones share the run lock.
#[derive(Clone)]
pub struct RunController {
    catalog: Arc<JobCatalog>,
    store: Arc<dyn LogStore>,
    // held by the driving task, so it is released however the run ends
    run_lock: Arc<Semaphore>,
    state: Arc<watch::Sender<RunState>>,
    on_disconnect: DisconnectPolicy,
}

/// The caller's side of a run: its transcript as it is produced, then its outcome.
pub struct RunHandle {
    output: mpsc::Receiver<OutputBlob>,
    outcome: oneshot::Receiver<RunOutcome>,
}

impl RunHandle {
    /// Next transcript chunk, or `None` once the run has finished producing output.
    pub async fn next_chunk(&mut self) -> Option<OutputBlob> {
        self.output.recv().await
    }

    /// Split into the chunk receiver and the outcome. Dropping the receiver
    /// counts as a client disconnect.
    pub fn into_parts(self) -> (mpsc::Receiver<OutputBlob>, oneshot::Receiver<RunOutcome>) {
        (self.output, self.outcome)
    }

    /// Read the rest of the transcript and wait for the outcome.
    pub async fn collect(mut self) -> (Vec<u8>, Option<RunOutcome>) {
        let mut transcript = Vec::new();
        while let Some(chunk) = self.output.recv().await {
            transcript.extend_from_slice(&chunk);
        }
        (transcript, self.outcome.await.ok())
    }
}

impl RunController {
    pub fn new(
        catalog: JobCatalog,
        store: Arc<dyn LogStore>,
        on_disconnect: DisconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            catalog: Arc::new(catalog),
            store,
            run_lock: Arc::new(Semaphore::new(1)),
            state: Arc::new(state),
            on_disconnect,
        }
    }

    pub fn catalog(&self) -> &JobCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Start running `job_name` on behalf of `user`. Output starts flowing
    /// once the run lock is acquired; dropping the handle is governed by the
    /// [`DisconnectPolicy`].
    pub fn start(&self, job_name: &str, user: &str) -> RunHandle {
        let (output_tx, output_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let driver = Driver {
            catalog: self.catalog.clone(),
            store: self.store.clone(),
            state: self.state.clone(),
            on_disconnect: self.on_disconnect,
            job_name: job_name.to_string(),
            user: user.to_string(),
        };
        let run_lock = self.run_lock.clone();
        let state = self.state.clone();
        let span = tracing::info_span!("run", job = %job_name, user = %user);

        tokio::spawn(
            async move {
                let permit = match run_lock.acquire_owned().await {
                    Ok(permit) => permit,
                    // the semaphore is never closed
                    Err(_) => return,
                };
                let outcome = driver.run(output_tx).await;
                state.send_replace(RunState::Idle);
                drop(permit);
                let _ = outcome_tx.send(outcome);
            }
            .instrument(span),
        );

        RunHandle {
            output: output_rx,
            outcome: outcome_rx,
        }
    }
}
