use super::transcript;
use super::{RunOutcome, RunStatus};
use crate::catalog::JobCatalog;
use crate::config::DisconnectPolicy;
use crate::error::JobError;
use crate::events::{JobStatus, RunState};
use crate::launcher::{self, LaunchedProcess};
use crate::multiplexer::multiplex;
use crate::store::{blocking, duration_secs, LogStore};
use crate::types::{JobName, OutputBlob, RunId, User};
use chrono::{DateTime, Utc};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(100);

/// Everything one run needs, moved into the task that holds the run lock.
pub(super) struct Driver {
    pub(super) catalog: Arc<JobCatalog>,
    pub(super) store: Arc<dyn LogStore>,
    pub(super) state: Arc<watch::Sender<RunState>>,
    pub(super) on_disconnect: DisconnectPolicy,
    pub(super) job_name: JobName,
    pub(super) user: User,
}

/// Fans each transcript chunk out to the log store, then to the client.
struct Relay {
    store: Arc<dyn LogStore>,
    id: Option<RunId>,
    client: Option<mpsc::Sender<OutputBlob>>,
}

impl Relay {
    async fn emit(&mut self, chunk: OutputBlob) {
        if let Some(id) = &self.id {
            let store = self.store.clone();
            let id = id.clone();
            let stored = chunk.clone();
            if let Err(err) = blocking(move || store.append(&id, &stored)).await {
                warn!(error = %err, "failed to append output to run log");
            }
        }
        if let Some(client) = &self.client {
            if client.send(chunk).await.is_err() {
                info!("client went away, no longer streaming output");
                self.client = None;
            }
        }
    }

    async fn client_gone(&self) {
        if let Some(client) = &self.client {
            client.closed().await;
        }
    }
}

impl Driver {
    fn enter(&self, state: RunState) {
        debug!(?state, "run state");
        self.state.send_replace(state);
    }

    // caller holds the run lock for the whole call
    pub(super) async fn run(self, client: mpsc::Sender<OutputBlob>) -> RunOutcome {
        self.enter(RunState::Validating);
        let start = Utc::now();

        let id = {
            let store = self.store.clone();
            let (job, user) = (self.job_name.clone(), self.user.clone());
            match blocking(move || store.create(&job, &user, start)).await {
                Ok(id) => Some(id),
                Err(err) => {
                    error!(error = %err, "failed to create run record, running unrecorded");
                    None
                }
            }
        };
        let mut relay = Relay {
            store: self.store.clone(),
            id,
            client: Some(client),
        };
        relay.emit(transcript::header(start, &self.user)).await;
        if relay.id.is_none() {
            relay.emit(transcript::warning("this run is not being recorded")).await;
        }

        let status = match self.launch() {
            Ok(process) => {
                info!(pid = ?process.pid, "job started");
                self.enter(RunState::Running);
                self.drain(process, &mut relay).await
            }
            Err(err) => {
                warn!(error = %err, "job did not start");
                relay.emit(transcript::error(&err)).await;
                match err {
                    JobError::NotFound(_) => RunStatus::NotFound,
                    _ => RunStatus::LaunchFailed,
                }
            }
        };

        self.enter(RunState::Finalizing);
        let end = Utc::now();
        let elapsed = duration_secs(start, end);
        relay.emit(transcript::footer(elapsed, &status)).await;

        let recorded = match &relay.id {
            Some(id) => self.finalize(id, end, status.exit_status()).await,
            None => false,
        };
        if relay.id.is_some() && !recorded {
            relay
                .emit(transcript::warning("run record could not be finalized"))
                .await;
        }
        info!(status = status.exit_status(), elapsed, "run finished");

        RunOutcome {
            id: relay.id,
            status,
            duration: Duration::from_secs_f64(elapsed),
            recorded,
        }
    }

    fn launch(&self) -> Result<LaunchedProcess, JobError> {
        let path = self.catalog.resolve(&self.job_name)?;
        launcher::start(&path)
    }

    /// Relay merged output until both pipes are closed and the child is reaped.
    async fn drain(&self, process: LaunchedProcess, relay: &mut Relay) -> RunStatus {
        let LaunchedProcess {
            stdout,
            stderr,
            mut exit,
            mut kill,
            ..
        } = process;
        let mut merged = multiplex(stdout, stderr);
        let kill_on_disconnect = self.on_disconnect == DisconnectPolicy::Kill;
        self.enter(RunState::Draining);

        let mut output_done = false;
        let mut exited: Option<io::Result<JobStatus>> = None;
        let mut killed = false;

        while !output_done || exited.is_none() {
            select! {
                chunk = merged.recv(), if !output_done => match chunk {
                    Some(output) => relay.emit(output.into_blob()).await,
                    None => output_done = true,
                },
                status = &mut exit, if exited.is_none() => {
                    exited = Some(status.unwrap_or_else(|_| {
                        Err(io::Error::new(io::ErrorKind::Other, "process waiter went away"))
                    }));
                },
                _ = relay.client_gone(), if kill_on_disconnect && !killed => {
                    info!("client went away, killing job");
                    killed = true;
                    kill.kill();
                },
            }
        }

        match exited {
            Some(Ok(status)) => RunStatus::Finished(status),
            Some(Err(err)) => {
                error!(error = %err, "failed to wait for job");
                relay.emit(transcript::error(&err)).await;
                RunStatus::WaitFailed
            }
            None => RunStatus::WaitFailed,
        }
    }

    /// Persist end time and status, retrying transient store failures.
    async fn finalize(&self, id: &RunId, end: DateTime<Utc>, status: i32) -> bool {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            let store = self.store.clone();
            let id = id.clone();
            match blocking(move || store.finalize(&id, end, status)).await {
                Ok(()) => return true,
                Err(err) => {
                    warn!(attempt, error = %err, "failed to finalize run record");
                    if attempt < FINALIZE_ATTEMPTS {
                        tokio::time::sleep(FINALIZE_BACKOFF * attempt).await;
                    }
                }
            }
        }
        error!(id = %id, "giving up on finalizing run record");
        false
    }
}
