//! Kiln CLI - drive an external image-classifier trainer from the terminal.
//!
//! Provides the `kiln` command: start and watch training runs, check the Python
//! side, and inspect or compare past experiments.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{compare, decode, doctor, envs, history, models, train};
use kiln_core::KilnSettings;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Kiln - image classifier training orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    author,
    version,
    about = "Kiln - run and track image-classifier training",
    long_about = "Kiln launches a Python training worker, follows its JSON-lines progress output,\nand keeps a short history of finished experiments for comparison and export."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). Defaults to the settings file, then info.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Extra settings file, applied over ~/.kiln/config.toml and ./.kilnrc
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model
    ///
    /// Starts the worker, streams progress until it exits, and records the run in
    /// history when it completes. Ctrl-C cancels the run.
    Train(train::TrainArgs),

    /// Check the Python interpreter, worker dependencies and GPU
    Doctor {
        /// Check inside a named environment instead of the system interpreter
        #[arg(long)]
        env: Option<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List isolated environments and whether they can run the worker
    Envs {
        /// Only list, do not probe each environment
        #[arg(long)]
        no_probe: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recently completed experiments
    History {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Overlay the metrics of two experiments by epoch
    Compare {
        /// First experiment id
        left: String,

        /// Second experiment id
        right: String,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode worker output (JSON lines) from a file or stdin
    Decode {
        /// File to read; stdin when omitted
        file: Option<PathBuf>,
    },

    /// List supported model architectures
    Models {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = KilnSettings::load(args.config.as_deref()).context("Failed to load settings")?;

    // Initialize tracing
    let level = match args.log_level.as_deref().or(settings.log_level.as_deref()).unwrap_or("info") {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Train(train_args) => {
            let code = train::execute(train_args, settings).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Doctor { env, json } => {
            doctor::execute(&settings, env.as_deref(), json).await?;
        }
        Command::Envs { no_probe, json } => {
            envs::execute(&settings, !no_probe, json).await?;
        }
        Command::History { json } => {
            history::execute(&settings, json)?;
        }
        Command::Compare { left, right, json } => {
            compare::execute(&settings, &left, &right, json)?;
        }
        Command::Decode { file } => {
            decode::execute(file.as_deref())?;
        }
        Command::Models { json } => {
            models::execute(json)?;
        }
    }

    Ok(())
}
