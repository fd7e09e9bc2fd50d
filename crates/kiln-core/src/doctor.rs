//! Dependency and GPU checks against a resolved interpreter.

use crate::error::{CoreError, Result};
use crate::probe::ProbeRunner;
use crate::resolver::Interpreter;
use serde::{Deserialize, Serialize};

const DEPENDENCY_SCRIPT: &str = "import sys, json, importlib.util; \
p = lambda x: importlib.util.find_spec(x) is not None; \
print(json.dumps({'python': True, 'executable': sys.executable, 'version': sys.version.split()[0], \
'pandas': p('pandas'), 'sklearn': p('sklearn'), 'torch': p('torch')}))";

const GPU_SCRIPT: &str = "import sys, json\n\
info = {'python_version': sys.version.split()[0], 'torch_version': None, 'cuda_available': False, \
'cuda_version': None, 'device_count': 0, 'device_name': None}\n\
try:\n    import torch\n    info['torch_version'] = torch.__version__\n\
    info['cuda_available'] = torch.cuda.is_available()\n    info['cuda_version'] = torch.version.cuda\n\
    if info['cuda_available']:\n        info['device_count'] = torch.cuda.device_count()\n\
        info['device_name'] = torch.cuda.get_device_name(0)\n\
except Exception:\n    pass\n\
print(json.dumps(info))";

/// Which worker dependencies the interpreter can import.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyReport {
    pub python: bool,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub pandas: bool,
    #[serde(default)]
    pub sklearn: bool,
    #[serde(default)]
    pub torch: bool,
    /// Why the interpreter could not be asked at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyReport {
    fn unavailable(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Default::default() }
    }

    /// Everything the worker imports is present.
    #[must_use]
    pub const fn ready(&self) -> bool {
        self.python && self.torch && self.sklearn && self.pandas
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GpuReport {
    pub python_version: String,
    #[serde(default)]
    pub torch_version: Option<String>,
    #[serde(default)]
    pub cuda_available: bool,
    #[serde(default)]
    pub cuda_version: Option<String>,
    #[serde(default)]
    pub device_count: u32,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// Ask the interpreter which modules it can import.
///
/// Never fails: an interpreter that cannot run yields `python = false` with the reason.
pub async fn probe_dependencies(probe: &dyn ProbeRunner, interpreter: &Interpreter) -> DependencyReport {
    match run_script(probe, interpreter, DEPENDENCY_SCRIPT).await {
        Ok(stdout) => serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
            DependencyReport::unavailable(format!("unexpected probe output: {e}"))
        }),
        Err(e) => DependencyReport::unavailable(e.to_string()),
    }
}

pub async fn probe_gpu(probe: &dyn ProbeRunner, interpreter: &Interpreter) -> Result<GpuReport> {
    let stdout = run_script(probe, interpreter, GPU_SCRIPT).await?;
    serde_json::from_str(stdout.trim())
        .map_err(|e| CoreError::Probe(format!("GPU detection failed: {e}")))
}

async fn run_script(probe: &dyn ProbeRunner, interpreter: &Interpreter, script: &str) -> Result<String> {
    let mut args = interpreter.prefix_args.clone();
    args.push("-c".to_string());
    args.push(script.to_string());

    let output = probe.run(&interpreter.program, &args).await?;
    if !output.success && output.stdout.trim().is_empty() {
        let reason = output.stderr.trim();
        return Err(CoreError::Probe(if reason.is_empty() {
            format!("{} exited with an error", interpreter.program)
        } else {
            reason.replace('\n', " ")
        }));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutput;
    use async_trait::async_trait;

    struct FixedProbe(Result<ProbeOutput>);

    #[async_trait]
    impl ProbeRunner for FixedProbe {
        async fn run(&self, _program: &str, args: &[String]) -> Result<ProbeOutput> {
            assert_eq!(args[args.len() - 2], "-c");
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(e) => Err(CoreError::Probe(e.to_string())),
            }
        }
    }

    fn stdout(text: &str) -> FixedProbe {
        FixedProbe(Ok(ProbeOutput { success: true, stdout: text.to_string(), stderr: String::new() }))
    }

    #[tokio::test]
    async fn test_dependency_report_decodes() {
        let probe = stdout(
            "{\"python\": true, \"executable\": \"/usr/bin/python3\", \"version\": \"3.11.4\", \"pandas\": true, \"sklearn\": true, \"torch\": false}\n",
        );
        let report = probe_dependencies(&probe, &Interpreter::system("python3")).await;
        assert!(report.python);
        assert_eq!(report.version.as_deref(), Some("3.11.4"));
        assert!(!report.torch);
        assert!(!report.ready());
    }

    #[tokio::test]
    async fn test_dependency_probe_failure_is_reported_not_raised() {
        let probe = FixedProbe(Err(CoreError::Probe("python: not found".to_string())));
        let report = probe_dependencies(&probe, &Interpreter::system("python")).await;
        assert!(!report.python);
        assert!(report.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_gpu_report_decodes_without_cuda() {
        let probe = stdout(
            r#"{"python_version": "3.10.12", "torch_version": "2.2.0", "cuda_available": false, "cuda_version": null, "device_count": 0, "device_name": null}"#,
        );
        let report = probe_gpu(&probe, &Interpreter::in_environment("conda", "vision")).await.unwrap();
        assert_eq!(report.torch_version.as_deref(), Some("2.2.0"));
        assert!(!report.cuda_available);
        assert_eq!(report.device_count, 0);
    }

    #[tokio::test]
    async fn test_gpu_probe_surfaces_stderr_on_failure() {
        let probe = FixedProbe(Ok(ProbeOutput {
            success: false,
            stdout: String::new(),
            stderr: "Traceback\nSyntaxError".to_string(),
        }));
        let err = probe_gpu(&probe, &Interpreter::system("python")).await.unwrap_err();
        assert!(err.to_string().contains("SyntaxError"));
    }
}
