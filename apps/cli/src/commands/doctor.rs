//! Doctor command implementation.
//!
//! Resolves the interpreter the same way `train` would, then asks it about the worker's
//! dependencies and the GPU.

use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::{
    CommandProbe, DependencyReport, InterpreterResolver, KilnSettings, probe_dependencies, probe_gpu,
};
use kiln_training::ExecutionEnvironment;
use serde_json::json;
use std::sync::Arc;

pub async fn execute(settings: &KilnSettings, env: Option<&str>, json_output: bool) -> Result<()> {
    let environment = ExecutionEnvironment::from_selector(env);
    let probe = Arc::new(CommandProbe::new(settings.probe_timeout()));
    let resolver = InterpreterResolver::from_settings(settings, probe.clone());

    let interpreter = resolver
        .resolve(&environment)
        .await
        .context("Failed to find a Python interpreter")?;

    let dependencies = probe_dependencies(probe.as_ref(), &interpreter).await;
    let gpu = probe_gpu(probe.as_ref(), &interpreter).await;
    let script_found = settings.worker_script.is_file();

    if json_output {
        let out = json!({
            "interpreter": interpreter.program,
            "prefix_args": interpreter.prefix_args,
            "worker_script": settings.worker_script,
            "worker_script_found": script_found,
            "dependencies": dependencies,
            "gpu": gpu.as_ref().ok(),
            "gpu_error": gpu.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Kiln Doctor - Training Environment".bold().cyan());
    println!();

    println!("{}", "Interpreter:".bold());
    let command = std::iter::once(interpreter.program.as_str())
        .chain(interpreter.prefix_args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    println!("  Command: {}", command.green());
    if let Some(version) = &dependencies.version {
        println!("  Version: {}", version);
    }
    if let Some(executable) = &dependencies.executable {
        println!("  Executable: {}", executable.dimmed());
    }
    println!();

    println!("{}", "Worker:".bold());
    let script = settings.worker_script.display().to_string();
    if script_found {
        println!("  Script: {} {}", "✓".green(), script);
    } else {
        println!("  Script: {} {}", "✗ not found".red(), script);
    }
    println!();

    println!("{}", "Dependencies:".bold());
    print_dependencies(&dependencies);
    println!();

    println!("{}", "GPU:".bold());
    match &gpu {
        Ok(report) => {
            println!("  torch: {}", report.torch_version.as_deref().unwrap_or("not installed"));
            if report.cuda_available {
                println!("  CUDA: {} ({})", "✓ available".green(), report.cuda_version.as_deref().unwrap_or("?"));
                println!("  Devices: {}", report.device_count);
                if let Some(name) = &report.device_name {
                    println!("  Device 0: {}", name);
                }
            } else {
                println!("  CUDA: {}", "not available, training will use the CPU".yellow());
            }
        }
        Err(e) => println!("  {}", format!("✗ {}", e).red()),
    }
    println!();

    if dependencies.ready() && script_found {
        println!("{}", "Ready to train.".green().bold());
    } else {
        println!("{}", "Some checks failed; see above.".yellow().bold());
    }
    Ok(())
}

fn print_dependencies(report: &DependencyReport) {
    if let Some(error) = &report.error {
        println!("  {}", format!("✗ Could not run Python: {}", error).red());
        return;
    }
    for (name, present) in [("torch", report.torch), ("sklearn", report.sklearn), ("pandas", report.pandas)] {
        let mark = if present { "✓ installed".green() } else { "✗ missing".red() };
        println!("  {:<8} {}", name, mark);
    }
}
