//! Models command implementation.

use anyhow::Result;
use colored::Colorize;
use kiln_training::ModelArch;
use serde_json::json;

pub fn execute(json_output: bool) -> Result<()> {
    if json_output {
        let out: Vec<_> = ModelArch::ALL
            .iter()
            .map(|arch| json!({ "id": arch.id(), "label": arch.label() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for arch in ModelArch::ALL {
        let marker = if arch == ModelArch::default() { " (default)".dimmed() } else { "".normal() };
        println!("{:<18} {}{}", arch.id().cyan(), arch.label(), marker);
    }
    Ok(())
}
