use crate::error::{JobError, Result};
use crate::events::JobStatus;
use futures::future::FutureExt;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::{
    process::{ChildStderr, ChildStdout, Command},
    select,
    sync::oneshot,
};
use tracing::{debug, warn};

/// Resolves once the child has been reaped.
pub type ExitFuture = oneshot::Receiver<io::Result<JobStatus>>;

/// A started child process, split into its independent parts.
pub struct LaunchedProcess {
    pub pid: Option<u32>,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    pub exit: ExitFuture,
    pub kill: KillHandle,
}

/// Kills the child's whole process group. Dropping it does nothing.
pub struct KillHandle {
    pgid: Option<Pid>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl KillHandle {
    /// Returns false if a kill was already requested or nothing was left to kill.
    pub fn kill(&mut self) -> bool {
        let kill_tx = match self.kill_tx.take() {
            Some(kill_tx) => kill_tx,
            None => return false,
        };
        if kill_tx.send(()).is_ok() {
            return true;
        }
        // The shell is already reaped; forked children may still hold the pipes.
        match self.pgid {
            Some(pgid) => kill_group(pgid).is_ok(),
            None => false,
        }
    }
}

fn kill_group(pgid: Pid) -> nix::Result<()> {
    debug!(%pgid, "killing process group");
    killpg(pgid, Signal::SIGKILL)
}

/// Start the executable at `path` with no arguments, leading a new process group.
pub fn start(path: &Path) -> Result<LaunchedProcess> {
    let launch_err = |source: io::Error| JobError::Launch {
        path: path.to_path_buf(),
        source,
    };

    let mut child = Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(launch_err)?;

    let pid = child.id();
    let pgid = pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw);
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| launch_err(io::Error::new(io::ErrorKind::Other, "stdout not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| launch_err(io::Error::new(io::ErrorKind::Other, "stderr not piped")))?;

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = oneshot::channel();

    // waiter: reaps the child, kills its group on request
    tokio::spawn(async move {
        let mut kill_rx = kill_rx.fuse();
        let mut listen_for_kill = true;
        loop {
            select! {
                kill = &mut kill_rx, if listen_for_kill => {
                    listen_for_kill = false;
                    if kill.is_ok() {
                        let killed = match pgid {
                            Some(pgid) => kill_group(pgid).map_err(io::Error::from),
                            None => child.start_kill(),
                        };
                        if let Err(err) = killed {
                            warn!(?pid, error = %err, "failed to kill child process");
                        }
                    }
                }
                exit_status = child.wait() => {
                    let _ = exit_tx.send(exit_status.map(JobStatus::from));
                    break;
                }
            }
        }
    });

    Ok(LaunchedProcess {
        pid,
        stdout,
        stderr,
        exit: exit_rx,
        kill: KillHandle {
            pgid,
            kill_tx: Some(kill_tx),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::script;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "fail.sh", "echo out; echo err >&2; exit 3");

        let mut process = start(&path).unwrap();
        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        let mut err = String::new();
        process.stderr.read_to_string(&mut err).await.unwrap();

        assert_eq!(out, "out\n");
        assert_eq!(err, "err\n");
        let status = process.exit.await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Exited { code: 3 });
        assert_eq!(status.exit_status(), 3);
    }

    #[tokio::test]
    async fn kill_reports_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "sleepy.sh", "exec sleep 30");

        let mut process = start(&path).unwrap();
        assert!(process.kill.kill());
        assert!(!process.kill.kill());

        let status = process.exit.await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Killed { signal: 9 });
        assert_eq!(status.exit_status(), 137);
    }

    #[tokio::test]
    async fn kill_reaches_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        // No exec: `sleep` is a child of the shell and inherits its pipes.
        let path = script(dir.path(), "forks.sh", "echo hi; sleep 30; echo done");

        let mut process = start(&path).unwrap();
        let mut first = [0u8; 3];
        process.stdout.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"hi\n");

        assert!(process.kill.kill());
        let status = timeout(Duration::from_secs(2), process.exit)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(status, JobStatus::Killed { signal: 9 });

        let mut rest = String::new();
        timeout(Duration::from_secs(2), process.stdout.read_to_string(&mut rest))
            .await
            .expect("stdout stayed open after kill")
            .unwrap();
        assert_eq!(rest, "");
    }

    #[tokio::test]
    async fn dropping_kill_handle_does_not_kill() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "quick.sh", "sleep 0.2; exit 0");

        let process = start(&path).unwrap();
        drop(process.kill);
        let status = process.exit.await.unwrap().unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn missing_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = start(&dir.path().join("missing.sh")).err().unwrap();
        assert!(matches!(err, JobError::Launch { .. }));
    }

    #[tokio::test]
    async fn non_executable_file_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "not a program").unwrap();
        assert!(matches!(start(&path), Err(JobError::Launch { .. })));
    }
}
