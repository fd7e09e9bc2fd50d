//! Decode command implementation.
//!
//! Replays captured worker output through the decoder, one JSON event per input line,
//! blank lines included.

use anyhow::{Context, Result};
use kiln_training::decode;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

pub fn execute(file: Option<&Path>) -> Result<()> {
    let source: Box<dyn Read> = match file {
        Some(path) => Box::new(
            std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin()),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in BufReader::new(source).split(b'\n') {
        let bytes = line.context("Failed to read input")?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_end_matches('\r');
        writeln!(out, "{}", serde_json::to_string(&decode(text))?)?;
    }
    Ok(())
}
