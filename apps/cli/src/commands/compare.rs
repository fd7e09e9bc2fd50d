//! Compare command implementation.

use super::render;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::{KilnSettings, TrainingController};

pub fn execute(settings: &KilnSettings, left: &str, right: &str, json_output: bool) -> Result<()> {
    let controller = TrainingController::new(settings.clone());
    let merged = controller.compare(left, right).context("Failed to compare experiments")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&merged)?);
        return Ok(());
    }

    println!();
    println!("{} {} {}", left.cyan(), "vs".dimmed(), right.magenta());
    println!();
    println!("{:>6}  {:>10} {:>10}  {:>10} {:>10}", "Epoch", "val acc", "val loss", "val acc", "val loss");
    println!("{}", "─".repeat(54));
    for point in &merged {
        let (left_acc, left_loss) = point.left.as_ref().map_or((None, None), |p| (p.val_accuracy, p.val_loss));
        let (right_acc, right_loss) = point.right.as_ref().map_or((None, None), |p| (p.val_accuracy, p.val_loss));
        println!(
            "{:>6}  {:>10} {:>10}  {:>10} {:>10}",
            point.epoch,
            render::percent(left_acc).cyan(),
            render::number(left_loss),
            render::percent(right_acc).magenta(),
            render::number(right_loss),
        );
    }
    println!();
    Ok(())
}
