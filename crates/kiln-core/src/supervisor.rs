//! Worker process supervision.
//!
//! A started worker is read by two line readers (stdout, stderr) and watched by one
//! waiter task. The waiter reports exit on the `closed` channel only after both readers
//! have drained, so a consumer that reads the line channels to their end before awaiting
//! `closed` sees every line the worker printed.

use crate::error::{CoreError, Result};
use kiln_training::RunInvocation;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long readers may keep going after the process exits. Grandchildren that inherited
/// the pipes can otherwise hold them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SupervisorState {
    #[default]
    Idle,
    Running { pid: Option<u32> },
    Exited(Option<i32>),
    Errored(String),
    /// Stopped on request.
    Killed,
}

/// Terminal event for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// `None` when the process was ended by a signal.
    Exited(Option<i32>),
    /// Waiting on the process failed.
    Errored(String),
}

/// Receiving ends for one run.
#[derive(Debug)]
pub struct RunChannels {
    pub stdout: mpsc::UnboundedReceiver<String>,
    pub stderr: mpsc::UnboundedReceiver<String>,
    pub closed: oneshot::Receiver<ProcessExit>,
}

#[derive(Default)]
struct Inner {
    state: SupervisorState,
    cancel: Option<oneshot::Sender<()>>,
}

/// Owns at most one worker process at a time.
#[derive(Clone)]
pub struct ProcessSupervisor {
    cancel_grace: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(cancel_grace: Duration) -> Self {
        Self { cancel_grace, inner: Arc::new(Mutex::new(Inner::default())) }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.lock().state, SupervisorState::Running { .. })
    }

    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn start(&self, invocation: &RunInvocation) -> Result<RunChannels> {
        let mut inner = self.lock();
        if matches!(inner.state, SupervisorState::Running { .. }) {
            return Err(CoreError::AlreadyRunning);
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so cancellation reaches wrapper children too.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            inner.state = SupervisorState::Errored(e.to_string());
            CoreError::SpawnFailed(format!("{}: {}", invocation.program, e))
        })?;
        let pid = child.id();

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let readers = [
            child.stdout.take().map(|out| spawn_line_reader(out, stdout_tx)),
            child.stderr.take().map(|err| spawn_line_reader(err, stderr_tx)),
        ];

        tracing::info!(run_id = %invocation.run_id, ?pid, command = %invocation.display_command(), "worker started");
        inner.state = SupervisorState::Running { pid };
        inner.cancel = Some(cancel_tx);
        drop(inner);

        tokio::spawn(watch_child(
            child,
            readers.into_iter().flatten().collect(),
            cancel_rx,
            closed_tx,
            self.cancel_grace,
            Arc::clone(&self.inner),
        ));

        Ok(RunChannels { stdout: stdout_rx, stderr: stderr_rx, closed: closed_rx })
    }

    /// Ask the running worker to stop. Returns immediately; the exit arrives on `closed`.
    pub fn cancel(&self) -> Result<()> {
        let mut inner = self.lock();
        if !matches!(inner.state, SupervisorState::Running { .. }) {
            return Err(CoreError::NotRunning);
        }
        match inner.cancel.take() {
            Some(cancel) => {
                let _ = cancel.send(());
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn spawn_line_reader<R>(source: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "worker pipe read failed");
                    break;
                }
            }
        }
    })
}

async fn watch_child(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    cancel_rx: oneshot::Receiver<()>,
    closed_tx: oneshot::Sender<ProcessExit>,
    grace: Duration,
    inner: Arc<Mutex<Inner>>,
) {
    let mut cancelled = false;
    let waited = tokio::select! {
        status = child.wait() => status,
        Ok(()) = cancel_rx => {
            cancelled = true;
            terminate(&mut child, grace).await
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            tracing::warn!("worker output still open after exit; abandoning reader");
            reader.abort();
        }
    }

    let exit = match waited {
        Ok(status) => ProcessExit::Exited(status.code()),
        Err(e) => ProcessExit::Errored(e.to_string()),
    };
    tracing::info!(?exit, cancelled, "worker finished");

    {
        let mut inner = inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.cancel = None;
        inner.state = match (&exit, cancelled) {
            (_, true) => SupervisorState::Killed,
            (ProcessExit::Exited(code), false) => SupervisorState::Exited(*code),
            (ProcessExit::Errored(e), false) => SupervisorState::Errored(e.clone()),
        };
    }

    let _ = closed_tx.send(exit);
}

/// Polite stop first, hard kill after `grace`.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return child.wait().await;
    };
    let group = Pid::from_raw(pid);

    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!(error = %e, "SIGTERM failed");
    }
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }

    tracing::warn!(grace_secs = grace.as_secs(), "worker ignored SIGTERM; killing");
    let _ = killpg(group, Signal::SIGKILL);
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "kill failed");
    }
    child.wait().await
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) -> std::io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "kill failed");
    }
    child.wait().await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use kiln_training::RunId;

    fn sh(script: &str) -> RunInvocation {
        RunInvocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            run_id: RunId::from("exp_unit"),
        }
    }

    #[tokio::test]
    async fn test_state_moves_from_running_to_exited() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        let mut channels = supervisor.start(&sh("exit 4")).unwrap();
        while channels.stdout.recv().await.is_some() {}
        assert_eq!(channels.closed.await.unwrap(), ProcessExit::Exited(Some(4)));
        assert_eq!(supervisor.state(), SupervisorState::Exited(Some(4)));
        assert!(!supervisor.is_active());
    }

    #[tokio::test]
    async fn test_cancel_without_run_is_not_running() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        assert!(matches!(supervisor.cancel(), Err(CoreError::NotRunning)));
    }

    #[tokio::test]
    async fn test_worker_sees_unbuffered_env() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let mut channels = supervisor.start(&sh("echo \"$PYTHONUNBUFFERED\"")).unwrap();
        assert_eq!(channels.stdout.recv().await.as_deref(), Some("1"));
    }
}
