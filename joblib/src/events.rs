use crate::types::OutputBlob;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Terminal outcome of a child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Exited { code: i32 },
    Killed { signal: i32 },
}

impl JobStatus {
    /// The status persisted in the log store: the exit code, or `128 + signal`
    /// for signal termination (the shell convention).
    pub fn exit_status(&self) -> i32 {
        match self {
            JobStatus::Exited { code } => *code,
            JobStatus::Killed { signal } => 128 + signal,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, JobStatus::Exited { code: 0 })
    }
}

impl From<ExitStatus> for JobStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => JobStatus::Exited { code },
            (None, Some(signal)) => JobStatus::Killed { signal },
            // unix always reports one of the two
            (None, None) => JobStatus::Exited { code: -1 },
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Exited { code } => write!(f, "exit status {}", code),
            JobStatus::Killed { signal } => write!(f, "killed by signal {}", signal),
        }
    }
}

/// A fragment of process output, tagged with the pipe it came from.
#[derive(Clone, Debug)]
pub enum Output {
    Stdout(OutputBlob),
    Stderr(OutputBlob),
}

impl Output {
    pub fn blob(&self) -> &OutputBlob {
        match self {
            Output::Stdout(blob) | Output::Stderr(blob) => blob,
        }
    }

    pub fn into_blob(self) -> OutputBlob {
        match self {
            Output::Stdout(blob) | Output::Stderr(blob) => blob,
        }
    }
}

/// Where a run currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Running,
    Draining,
    Finalizing,
}
