//! Envs command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::{CommandProbe, KilnSettings, list_environments, probe_environments};

pub async fn execute(settings: &KilnSettings, probe_each: bool, json_output: bool) -> Result<()> {
    let runner = settings.environment_runner.as_str();
    let probe = CommandProbe::new(settings.probe_timeout());

    let environments = list_environments(&probe, runner)
        .await
        .with_context(|| format!("Failed to list environments with `{runner}`"))?;

    if !probe_each {
        if json_output {
            println!("{}", serde_json::to_string_pretty(&environments)?);
        } else {
            for env in &environments {
                println!("{:<24} {}", env.name.cyan(), env.path.display().to_string().dimmed());
            }
        }
        return Ok(());
    }

    if !json_output {
        println!("Checking {} environments for torch...", environments.len());
    }
    let statuses = probe_environments(&probe, runner, environments).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!();
    println!("{:<24} {:<10} {}", "Environment", "torch", "Path");
    println!("{}", "─".repeat(72));
    for status in &statuses {
        let torch = if status.has_torch { "✓".green() } else { "✗".red() };
        println!(
            "{:<24} {:<10} {}",
            status.environment.name.cyan(),
            torch,
            status.environment.path.display().to_string().dimmed()
        );
    }
    println!();
    println!("  {}", "Use one with: kiln train <dataset> --env <name>".dimmed());
    Ok(())
}
