//! History command implementation.

use super::render;
use anyhow::Result;
use colored::Colorize;
use kiln_core::{KilnSettings, TrainingController};

pub fn execute(settings: &KilnSettings, json_output: bool) -> Result<()> {
    let records = TrainingController::new(settings.clone()).history();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Recent Experiments ({})", records.len()).bold().cyan());
    println!();

    if records.is_empty() {
        println!("  {}", "No completed experiments yet.".dimmed());
        println!();
        println!("  {}", "Tip: runs are recorded here when `kiln train` completes.".dimmed());
        return Ok(());
    }

    println!("{:<28} {:<20} {:<18} {:>7} {:>10} {:>9}", "ID", "Date", "Model", "Epochs", "Accuracy", "Duration");
    println!("{}", "─".repeat(97));
    for record in records.iter().rev() {
        println!(
            "{:<28} {:<20} {:<18} {:>7} {:>10} {:>8.0}s",
            record.id.cyan(),
            record.date.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.model.id(),
            record.epochs(),
            render::percent(Some(record.final_accuracy)),
            record.duration_secs,
        );
    }
    println!();
    Ok(())
}
