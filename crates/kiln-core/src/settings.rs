//! Settings file support.
//!
//! Settings are layered: defaults, then `~/.kiln/config.toml`, then `./.kilnrc`,
//! then an explicit file, then `KILN_*` environment variables. Each layer only
//! overrides the fields it sets.

use crate::error::{CoreError, Result};
use kiln_training::StderrFilter;
use kiln_training::history::DEFAULT_HISTORY_CAPACITY;
use kiln_training::log::DEFAULT_BENIGN_STDERR_PREFIXES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_WORKER_SCRIPT: &str = "KILN_WORKER_SCRIPT";
pub const ENV_DATA_DIR: &str = "KILN_DATA_DIR";

/// Resolved settings used by the resolver, supervisor and controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KilnSettings {
    /// Training script handed to the interpreter.
    pub worker_script: PathBuf,
    /// Interpreter commands to probe, in order.
    pub interpreter_candidates: Vec<String>,
    /// Arguments for the liveness probe; the candidate passes if it exits 0.
    pub probe_args: Vec<String>,
    pub probe_timeout_secs: u64,
    /// Environment manager used for named environments (`<runner> run -n <name> ...`).
    pub environment_runner: String,
    pub history_capacity: usize,
    /// Where history and other state live.
    pub data_dir: PathBuf,
    pub benign_stderr_prefixes: Vec<String>,
    /// How long a cancelled worker gets to exit before it is killed.
    pub cancel_grace_secs: u64,
    pub log_level: Option<String>,
}

impl Default for KilnSettings {
    fn default() -> Self {
        Self {
            worker_script: PathBuf::from("python_backend").join("train.py"),
            interpreter_candidates: vec!["python".to_string(), "python3".to_string(), "py".to_string()],
            probe_args: vec!["-c".to_string(), "print(0)".to_string()],
            probe_timeout_secs: 5,
            environment_runner: "conda".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            data_dir: default_data_dir(),
            benign_stderr_prefixes: DEFAULT_BENIGN_STDERR_PREFIXES.iter().map(ToString::to_string).collect(),
            cancel_grace_secs: 5,
            log_level: None,
        }
    }
}

/// One settings file. Every field is optional so a file can override just a few.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsLayer {
    #[serde(default)]
    pub worker_script: Option<PathBuf>,
    #[serde(default)]
    pub interpreter_candidates: Option<Vec<String>>,
    #[serde(default)]
    pub probe_args: Option<Vec<String>>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
    #[serde(default)]
    pub environment_runner: Option<String>,
    #[serde(default)]
    pub history_capacity: Option<usize>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub benign_stderr_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub cancel_grace_secs: Option<u64>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl SettingsLayer {
    /// Load one layer from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl KilnSettings {
    /// Get default global settings file path.
    pub fn default_global_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Get default local settings file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".kilnrc")
    }

    /// Discover and load every layer.
    ///
    /// Missing global/local files are skipped; a missing or broken explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = Self::default();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            if path.exists() {
                match SettingsLayer::load_from_file(&path) {
                    Ok(layer) => settings.merge(&layer),
                    Err(e) => tracing::warn!(error = %e, "ignoring unreadable settings file"),
                }
            }
        }

        if let Some(path) = explicit {
            settings.merge(&SettingsLayer::load_from_file(path)?);
        }

        settings.apply_env();
        Ok(settings)
    }

    /// Values from `layer` override values in `self` when set.
    pub fn merge(&mut self, layer: &SettingsLayer) {
        if let Some(ref script) = layer.worker_script {
            self.worker_script = script.clone();
        }
        if let Some(ref candidates) = layer.interpreter_candidates {
            self.interpreter_candidates = candidates.clone();
        }
        if let Some(ref args) = layer.probe_args {
            self.probe_args = args.clone();
        }
        if let Some(secs) = layer.probe_timeout_secs {
            self.probe_timeout_secs = secs;
        }
        if let Some(ref runner) = layer.environment_runner {
            self.environment_runner = runner.clone();
        }
        if let Some(capacity) = layer.history_capacity {
            self.history_capacity = capacity;
        }
        if let Some(ref dir) = layer.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(ref prefixes) = layer.benign_stderr_prefixes {
            self.benign_stderr_prefixes = prefixes.clone();
        }
        if let Some(secs) = layer.cancel_grace_secs {
            self.cancel_grace_secs = secs;
        }
        if let Some(ref level) = layer.log_level {
            self.log_level = Some(level.clone());
        }
    }

    fn apply_env(&mut self) {
        if let Some(script) = std::env::var_os(ENV_WORKER_SCRIPT).filter(|v| !v.is_empty()) {
            self.worker_script = PathBuf::from(script);
        }
        if let Some(dir) = std::env::var_os(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Save settings to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    #[must_use]
    pub fn stderr_filter(&self) -> StderrFilter {
        StderrFilter::new(self.benign_stderr_prefixes.clone())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".kiln"), |home| home.join(".kiln"))
}
