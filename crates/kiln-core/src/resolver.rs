//! Interpreter resolution.
//!
//! For the system environment each candidate command is probed in order and the first
//! that exits 0 wins. A named environment is never probed: the wrapper command is
//! returned as-is and a missing environment only shows up when the run fails to spawn.

use crate::error::{CoreError, Result};
use crate::probe::ProbeRunner;
use crate::settings::KilnSettings;
use kiln_training::{ExecutionEnvironment, RunId, RunInvocation};
use std::sync::Arc;

/// The command that runs the worker, plus any arguments that go before the script path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl Interpreter {
    #[must_use]
    pub fn system(program: impl Into<String>) -> Self {
        Self { program: program.into(), prefix_args: Vec::new() }
    }

    /// `<runner> run --no-capture-output -n <name> python`
    #[must_use]
    pub fn in_environment(runner: &str, name: &str) -> Self {
        Self {
            program: runner.to_string(),
            prefix_args: ["run", "--no-capture-output", "-n", name, "python"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Full command line: prefix arguments, then the worker arguments.
    #[must_use]
    pub fn invocation(&self, worker_args: Vec<String>, run_id: RunId) -> RunInvocation {
        let mut args = self.prefix_args.clone();
        args.extend(worker_args);
        RunInvocation { program: self.program.clone(), args, run_id }
    }
}

pub struct InterpreterResolver {
    candidates: Vec<String>,
    probe_args: Vec<String>,
    environment_runner: String,
    probe: Arc<dyn ProbeRunner>,
}

impl InterpreterResolver {
    pub fn new(
        candidates: Vec<String>,
        probe_args: Vec<String>,
        environment_runner: impl Into<String>,
        probe: Arc<dyn ProbeRunner>,
    ) -> Self {
        Self { candidates, probe_args, environment_runner: environment_runner.into(), probe }
    }

    /// Resolver configured by the interpreter fields of `settings`.
    pub fn from_settings(settings: &KilnSettings, probe: Arc<dyn ProbeRunner>) -> Self {
        Self::new(
            settings.interpreter_candidates.clone(),
            settings.probe_args.clone(),
            settings.environment_runner.clone(),
            probe,
        )
    }

    #[must_use]
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    #[must_use]
    pub fn environment_runner(&self) -> &str {
        &self.environment_runner
    }

    /// Pick the interpreter for `environment`. Probes again on every call.
    pub async fn resolve(&self, environment: &ExecutionEnvironment) -> Result<Interpreter> {
        match environment {
            ExecutionEnvironment::Named(name) => {
                tracing::debug!(environment = %name, "using isolated environment without probing");
                Ok(Interpreter::in_environment(&self.environment_runner, name))
            }
            ExecutionEnvironment::System => self.probe_system().await,
        }
    }

    async fn probe_system(&self) -> Result<Interpreter> {
        for candidate in &self.candidates {
            match self.probe.run(candidate, &self.probe_args).await {
                Ok(output) if output.success => {
                    tracing::info!(interpreter = %candidate, "interpreter resolved");
                    return Ok(Interpreter::system(candidate.clone()));
                }
                Ok(_) => tracing::debug!(interpreter = %candidate, "probe exited non-zero"),
                Err(e) => tracing::debug!(interpreter = %candidate, error = %e, "probe failed"),
            }
        }
        Err(CoreError::NoInterpreterFound { tried: self.candidates.clone() })
    }
}
