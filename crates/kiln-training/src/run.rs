use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Identifier for one training run, passed to the worker as `--experiment_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Timestamp-derived id, e.g. `exp_20260119_142501_337`.
    #[must_use]
    pub fn generate() -> Self {
        Self::at(Local::now())
    }

    #[must_use]
    pub fn at(time: DateTime<Local>) -> Self {
        Self(format!("exp_{}", time.format("%Y%m%d_%H%M%S_%3f")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A fully resolved command line for one run. Built once per start and consumed by the spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub run_id: RunId,
}

impl RunInvocation {
    /// Shell-like rendering for logs. Not meant to be re-parsed.
    #[must_use]
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
