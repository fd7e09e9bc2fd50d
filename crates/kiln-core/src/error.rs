//! Error types for orchestration.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced synchronously to whoever asked for a run, a probe, or a setting.
///
/// Problems that happen while a run is in flight never come back through this type:
/// they land in the session transcript and its terminal status.
#[derive(Debug, Error)]
pub enum CoreError {
    /// None of the interpreter candidates answered the probe.
    #[error("No usable interpreter found (tried: {})", .tried.join(", "))]
    NoInterpreterFound {
        /// Candidates in the order they were probed.
        tried: Vec<String>,
    },

    /// The configured worker script does not exist.
    #[error("Worker script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// The OS refused to create the worker process.
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// A run is already in progress.
    #[error("A training run is already in progress")]
    AlreadyRunning,

    /// There is no run to act on.
    #[error("No training run is in progress")]
    NotRunning,

    /// A short-lived probe command failed or timed out.
    #[error("Probe failed: {0}")]
    Probe(String),

    /// A history record was asked for by an id that is not present.
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    /// Settings could not be read or parsed.
    #[error("Invalid settings: {0}")]
    Config(String),

    /// Domain error from the training crate.
    #[error(transparent)]
    Training(#[from] kiln_training::TrainingError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
