//! Train command implementation.

use super::render;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use kiln_core::{KilnSettings, TrainingController};
use kiln_training::{ConfigDraft, FsTextSink, SessionState, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Exit status for a run the user cancelled, as for SIGINT.
pub const EXIT_CANCELLED: i32 = 130;

/// Values are taken as typed; anything unparsable falls back to its default.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Dataset directory (one sub-directory per class)
    pub dataset: String,

    /// Model architecture (see `kiln models`)
    #[arg(short, long, default_value = "resnet18")]
    pub model: String,

    /// Number of epochs
    #[arg(short, long, default_value = "10")]
    pub epochs: String,

    /// Batch size
    #[arg(short, long, default_value = "32")]
    pub batch_size: String,

    /// Learning rate
    #[arg(long, default_value = "0.001")]
    pub learning_rate: String,

    /// Data loader workers (-1 = auto, 0 = load in the main process)
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub workers: String,

    /// Epochs without improvement before stopping early
    #[arg(long, default_value = "5")]
    pub patience: String,

    /// Where the worker saves the trained model
    #[arg(long, default_value = "")]
    pub save_path: String,

    /// Checkpoint to resume from
    #[arg(long, default_value = "")]
    pub resume: String,

    /// Also archive the dataset
    #[arg(long)]
    pub zip_dataset: bool,

    /// Only archive the dataset, do not train
    #[arg(long)]
    pub only_zip: bool,

    /// Run inside this isolated environment instead of the system interpreter
    #[arg(long)]
    pub env: Option<String>,

    /// Write the finished session as JSON to this path
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Write the metric history as CSV to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Print each decoded worker event as a JSON line instead of the live view
    #[arg(long)]
    pub json: bool,
}

impl TrainArgs {
    fn draft(&self) -> ConfigDraft {
        ConfigDraft {
            dataset_path: self.dataset.clone(),
            save_path: self.save_path.clone(),
            model: self.model.clone(),
            epochs: self.epochs.clone(),
            batch_size: self.batch_size.clone(),
            learning_rate: self.learning_rate.clone(),
            num_workers: self.workers.clone(),
            patience: self.patience.clone(),
            resume_checkpoint: self.resume.clone(),
            generate_archive: self.zip_dataset,
            archive_only: self.only_zip,
            environment: self.env.clone().unwrap_or_default(),
        }
    }
}

/// Run to the end and return the process exit status for the outcome.
pub async fn execute(args: TrainArgs, settings: KilnSettings) -> Result<i32> {
    let config = args.draft().resolve();
    config.validate().context("Invalid training configuration")?;

    let controller = Arc::new(TrainingController::new(settings));
    let mut updates = controller.subscribe();
    let mut events = controller.subscribe_events();

    if !args.json {
        println!();
        println!("{}", format!("Training {} on {}", config.model.label(), config.dataset_path.display()).bold().cyan());
        println!();
    }

    controller.start(config).await.context("Failed to start training")?;

    let canceller = Arc::clone(&controller);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling training...".yellow());
            if let Err(e) = canceller.cancel() {
                tracing::debug!(error = %e, "cancel ignored");
            }
        }
    });

    let mut view = LiveView::default();
    loop {
        tokio::select! {
            event = events.recv(), if args.json => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event output fell behind"),
                Err(RecvError::Closed) => {}
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = updates.borrow_and_update().clone();
                if !args.json {
                    view.render(&session);
                }
                if session.status.is_terminal() {
                    break;
                }
            }
        }
    }

    let session = controller.join().await;
    ctrl_c.abort();

    if args.json {
        while let Ok(event) = events.try_recv() {
            println!("{}", serde_json::to_string(&event)?);
        }
    } else {
        view.render(&session);
        print_summary(&session);
    }

    if let Some(path) = args.export.as_deref() {
        controller.export_json(&FsTextSink, path).context("Failed to export session")?;
        eprintln!("Session exported to {}", path.display());
    }
    if let Some(path) = args.csv.as_deref() {
        controller.export_csv(&FsTextSink, path).context("Failed to export metrics")?;
        eprintln!("Metrics exported to {}", path.display());
    }

    Ok(exit_status(session.status))
}

pub const fn exit_status(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Completed => 0,
        SessionStatus::Cancelled => EXIT_CANCELLED,
        SessionStatus::Idle | SessionStatus::Running | SessionStatus::Failed => 1,
    }
}

/// Prints only what is new since the last render.
#[derive(Default)]
struct LiveView {
    logs: usize,
    last_epoch: Option<u32>,
}

impl LiveView {
    fn render(&mut self, session: &SessionState) {
        for entry in session.logs.iter().skip(self.logs) {
            println!("{}", render::log_line(entry));
        }
        self.logs = session.logs.len();

        if let (Some(point), Some(latest)) = (session.metrics.last(), session.latest.as_ref()) {
            if self.last_epoch != Some(point.epoch) {
                println!("{}", render::metric_line(point, latest.total_epochs, session.completion_percent));
                self.last_epoch = Some(point.epoch);
            }
        }
    }
}

fn print_summary(session: &SessionState) {
    println!();
    let status = match session.status {
        SessionStatus::Completed => "Training complete".bold().green(),
        SessionStatus::Cancelled => "Training cancelled".bold().yellow(),
        _ => "Training failed".bold().red(),
    };
    println!("{}", status);
    if let Some(run_id) = &session.run_id {
        println!("  Run: {}", run_id.as_str().cyan());
    }
    println!("  Epochs recorded: {}", session.metrics.len());
    println!("  Final accuracy: {}", render::percent(Some(session.final_accuracy())));
    println!("  Duration: {:.1}s", session.elapsed().as_secs_f64());

    if let Some(evaluation) = &session.evaluation {
        println!();
        println!("{}", "Evaluation".bold());
        if let Some(size) = evaluation.test_size {
            println!("  Test images: {size}");
        }
        if !evaluation.confusion_matrix_path.is_empty() {
            println!("  Confusion matrix: {}", evaluation.confusion_matrix_path.dimmed());
        }
        println!();
        render::print_report(&evaluation.report);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_training::{ExecutionEnvironment, ModelArch};

    fn args(list: &[&str]) -> TrainArgs {
        #[derive(clap::Parser)]
        struct Wrapper {
            #[command(flatten)]
            train: TrainArgs,
        }
        let argv = std::iter::once("kiln-train").chain(list.iter().copied());
        <Wrapper as clap::Parser>::parse_from(argv).train
    }

    #[test]
    fn test_flags_flow_into_configuration() {
        let config = args(&[
            "/data/flowers",
            "--model",
            "EfficientNet_B0",
            "--epochs",
            "25",
            "--workers",
            "-1",
            "--resume",
            "ckpt/last.pth",
            "--zip-dataset",
            "--env",
            "vision",
        ])
        .draft()
        .resolve();

        assert_eq!(config.model, ModelArch::EfficientnetB0);
        assert_eq!(config.epochs, 25);
        assert_eq!(config.num_workers, -1);
        assert_eq!(config.resume_checkpoint, Some(PathBuf::from("ckpt/last.pth")));
        assert!(config.generate_archive);
        assert_eq!(config.environment, ExecutionEnvironment::Named("vision".to_string()));
    }

    #[test]
    fn test_garbage_numbers_fall_back_to_defaults() {
        let config = args(&["/data", "--epochs", "lots", "--batch-size", "0", "--learning-rate", "fast"])
            .draft()
            .resolve();
        assert_eq!(config.epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert!((config.learning_rate - 0.001).abs() < f64::EPSILON);
        assert_eq!(config.environment, ExecutionEnvironment::System);
    }

    #[test]
    fn test_exit_status_per_outcome() {
        assert_eq!(exit_status(SessionStatus::Completed), 0);
        assert_eq!(exit_status(SessionStatus::Failed), 1);
        assert_eq!(exit_status(SessionStatus::Cancelled), 130);
    }
}
