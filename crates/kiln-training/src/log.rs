use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One line of a run's transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
}

impl LogEntry {
    #[must_use]
    pub fn now(severity: Severity, text: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), severity, text: text.into() }
    }
}

pub const DEFAULT_BENIGN_STDERR_PREFIXES: [&str; 7] = [
    "[Model Factory]",
    "INFO",
    "WARNING",
    "Warning:",
    "UserWarning",
    "FutureWarning",
    "DeprecationWarning",
];

/// Severity rule for worker stderr.
///
/// stderr is never decoded as protocol. Lines starting with a known benign prefix
/// (the worker's own logging, library deprecation notices) are kept as warnings
/// instead of errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StderrFilter {
    benign_prefixes: Vec<String>,
}

impl Default for StderrFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BENIGN_STDERR_PREFIXES.iter().map(ToString::to_string).collect())
    }
}

impl StderrFilter {
    #[must_use]
    pub fn new(benign_prefixes: Vec<String>) -> Self {
        Self { benign_prefixes }
    }

    /// Treats every non-empty stderr line as an error.
    #[must_use]
    pub fn strict() -> Self {
        Self::new(Vec::new())
    }

    /// `None` for blank lines, which are dropped.
    #[must_use]
    pub fn classify(&self, line: &str) -> Option<Severity> {
        let trimmed = line.trim_start();
        if trimmed.trim_end().is_empty() {
            return None;
        }
        if self.benign_prefixes.iter().any(|prefix| trimmed.starts_with(prefix.as_str())) {
            Some(Severity::Warning)
        } else {
            Some(Severity::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_classification() {
        let filter = StderrFilter::default();
        assert_eq!(filter.classify("Traceback (most recent call last):"), Some(Severity::Error));
        assert_eq!(filter.classify("  UserWarning: the weights argument is deprecated"), Some(Severity::Warning));
        assert_eq!(filter.classify("[Model Factory] Initializing dcn..."), Some(Severity::Warning));
        assert_eq!(filter.classify("   "), None);
    }

    #[test]
    fn test_strict_filter_reports_everything_as_error() {
        assert_eq!(StderrFilter::strict().classify("WARNING: low memory"), Some(Severity::Error));
    }
}
