//! Short-lived helper commands (interpreter liveness, dependency and GPU checks).

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one probe command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeOutput {
    /// The command exited with status 0.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command to completion and reports what it printed.
///
/// Implementations return `Err` only when the command could not be run or did not
/// finish in time; a non-zero exit is reported through [`ProbeOutput::success`].
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProbeOutput>;
}

/// [`ProbeRunner`] backed by a real child process with a hard timeout.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    timeout: Duration,
}

impl CommandProbe {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ProbeRunner for CommandProbe {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProbeOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program, ?args, "running probe");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                CoreError::Probe(format!("{program} timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| CoreError::Probe(format!("{program}: {e}")))?;

        Ok(ProbeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
