//! Isolated environment discovery.

use crate::error::{CoreError, Result};
use crate::probe::ProbeRunner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One environment known to the environment manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolatedEnvironment {
    pub name: String,
    pub path: PathBuf,
}

impl IsolatedEnvironment {
    /// Environments under an `envs/` directory are named after their folder; anything else
    /// is the root install.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let in_envs_dir = path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|dir| dir == "envs");
        let name = match path.file_name() {
            Some(name) if in_envs_dir => name.to_string_lossy().into_owned(),
            _ => "base".to_string(),
        };
        Self { name, path: path.to_path_buf() }
    }
}

/// Whether the worker runtime can be imported inside an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub environment: IsolatedEnvironment,
    pub has_torch: bool,
}

#[derive(Deserialize)]
struct EnvList {
    #[serde(default)]
    envs: Vec<PathBuf>,
}

/// `<runner> env list --json`
pub async fn list_environments(probe: &dyn ProbeRunner, runner: &str) -> Result<Vec<IsolatedEnvironment>> {
    let args = ["env", "list", "--json"].map(String::from);
    let output = probe.run(runner, &args).await?;
    if !output.success {
        return Err(CoreError::Probe(format!("{runner} env list failed: {}", output.stderr.trim())));
    }
    parse_env_list(&output.stdout)
}

pub fn parse_env_list(json: &str) -> Result<Vec<IsolatedEnvironment>> {
    let list: EnvList = serde_json::from_str(json.trim())?;
    Ok(list.envs.iter().map(|p| IsolatedEnvironment::from_path(p)).collect())
}

/// Check each environment in turn for `import torch`.
///
/// One at a time: the environment manager serialises access to its own state anyway.
pub async fn probe_environments(
    probe: &dyn ProbeRunner,
    runner: &str,
    environments: Vec<IsolatedEnvironment>,
) -> Vec<EnvironmentStatus> {
    let mut statuses = Vec::with_capacity(environments.len());
    for environment in environments {
        let args = ["run", "-n", environment.name.as_str(), "python", "-c", "import torch"].map(String::from);
        let has_torch = match probe.run(runner, &args).await {
            Ok(output) => output.success,
            Err(e) => {
                tracing::debug!(environment = %environment.name, error = %e, "environment probe failed");
                false
            }
        };
        statuses.push(EnvironmentStatus { environment, has_torch });
    }
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EnvProbe {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ProbeRunner for EnvProbe {
        async fn run(&self, _program: &str, args: &[String]) -> Result<ProbeOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            if args.first().map(String::as_str) == Some("env") {
                return Ok(ProbeOutput {
                    success: true,
                    stdout: r#"{"envs": ["/opt/conda", "/opt/conda/envs/vision", "/opt/conda/envs/tabular"]}"#
                        .to_string(),
                    stderr: String::new(),
                });
            }
            Ok(ProbeOutput { success: args.contains(&"vision".to_string()), ..Default::default() })
        }
    }

    #[test]
    fn test_names_come_from_path() {
        let envs = parse_env_list(r#"{"envs": ["/home/u/miniconda3", "/home/u/miniconda3/envs/torch-2"]}"#).unwrap();
        assert_eq!(envs[0].name, "base");
        assert_eq!(envs[1].name, "torch-2");
        assert_eq!(envs[1].path, PathBuf::from("/home/u/miniconda3/envs/torch-2"));
    }

    #[test]
    fn test_bad_env_list_is_an_error() {
        assert!(parse_env_list("conda: command not found").is_err());
    }

    #[tokio::test]
    async fn test_list_then_probe_sequentially() {
        let probe = EnvProbe { calls: Mutex::new(Vec::new()) };
        let envs = list_environments(&probe, "conda").await.unwrap();
        let statuses = probe_environments(&probe, "conda", envs).await;

        let available: Vec<_> =
            statuses.iter().map(|s| (s.environment.name.as_str(), s.has_torch)).collect();
        assert_eq!(available, vec![("base", false), ("vision", true), ("tabular", false)]);

        let calls = probe.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2], ["run", "-n", "vision", "python", "-c", "import torch"]);
    }
}
