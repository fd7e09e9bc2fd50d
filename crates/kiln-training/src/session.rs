//! State of one training run.
//!
//! ```text
//! Idle --begin--> Running --close(0)--> Completed
//!   |                |------close(n)--> Failed
//!   |                '-----cancel-----> Cancelled
//!   '--fail_to_start--> Failed
//! ```
//!
//! Terminal states are sinks. Anything that arrives after one (late stdout lines,
//! a second close, a close after cancel) is dropped and the state is left untouched.

use crate::config::TrainingConfiguration;
use crate::events::{EvaluationResult, ProgressSnapshot, TrainingEvent};
use crate::history::ExperimentRecord;
use crate::log::{LogEntry, Severity, StderrFilter};
use crate::run::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        })
    }
}

/// Which view the presentation layer should be showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewFocus {
    #[default]
    Configure,
    Metrics,
    Results,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub epoch: u32,
    pub train_accuracy: Option<f64>,
    pub train_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub val_loss: Option<f64>,
}

impl From<&ProgressSnapshot> for MetricPoint {
    fn from(progress: &ProgressSnapshot) -> Self {
        Self {
            epoch: progress.epoch,
            train_accuracy: progress.train_accuracy,
            train_loss: progress.train_loss,
            val_accuracy: progress.val_accuracy,
            val_loss: progress.val_loss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub run_id: Option<RunId>,
    pub config: TrainingConfiguration,
    pub status: SessionStatus,
    pub metrics: Vec<MetricPoint>,
    pub latest: Option<ProgressSnapshot>,
    pub completion_percent: f64,
    pub evaluation: Option<EvaluationResult>,
    pub logs: Vec<LogEntry>,
    pub focus: ViewFocus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl SessionState {
    #[must_use]
    pub fn new(config: TrainingConfiguration) -> Self {
        Self {
            run_id: None,
            config,
            status: SessionStatus::Idle,
            metrics: Vec::new(),
            latest: None,
            completion_percent: 0.0,
            evaluation: None,
            logs: Vec::new(),
            focus: ViewFocus::Configure,
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Idle -> Running once the worker process exists.
    pub fn begin(&mut self, run_id: RunId, command: &str) -> bool {
        if self.status != SessionStatus::Idle {
            return false;
        }
        self.log(Severity::Info, format!("Starting run {run_id}: {command}"));
        self.run_id = Some(run_id);
        self.status = SessionStatus::Running;
        self.started_at = Some(Utc::now());
        tracing::info!(run_id = ?self.run_id, "session running");
        true
    }

    /// Idle -> Failed when the worker could not be spawned. Never passes through Running.
    pub fn fail_to_start(&mut self, run_id: Option<RunId>, message: &str) -> bool {
        if self.status != SessionStatus::Idle {
            return false;
        }
        self.run_id = run_id;
        self.log(Severity::Error, format!("Failed to start training: {message}"));
        self.finish(SessionStatus::Failed);
        true
    }

    /// Apply one decoded stdout event. Returns `false` when the event was dropped.
    pub fn apply_event(&mut self, event: TrainingEvent) -> bool {
        if !self.is_running() {
            tracing::debug!(status = %self.status, "dropping event for inactive session");
            return false;
        }

        match event {
            TrainingEvent::Progress(progress) => self.record_progress(progress),
            TrainingEvent::Checkpoint { message, path } => {
                let text = match (message.is_empty(), path.is_empty()) {
                    (false, false) => format!("{message}: {path}"),
                    (false, true) => message,
                    (true, _) => format!("Checkpoint saved: {path}"),
                };
                self.log(Severity::Success, text);
            }
            TrainingEvent::EarlyStopped { epoch, message } => {
                let text = match epoch {
                    Some(epoch) if message.is_empty() => format!("Early stopping at epoch {epoch}"),
                    Some(epoch) => format!("Early stopping at epoch {epoch}: {message}"),
                    None => format!("Early stopping: {message}"),
                };
                self.log(Severity::Success, text);
                self.completion_percent = 100.0;
            }
            TrainingEvent::Resumed { epoch, best_accuracy, message } => {
                let epoch = epoch.map_or_else(|| "?".to_string(), |e| e.to_string());
                let best = best_accuracy.map_or_else(|| "n/a".to_string(), |a| format!("{a:.4}"));
                let mut text = format!("Resumed from epoch {epoch} (best accuracy {best})");
                if !message.is_empty() {
                    text.push_str(" - ");
                    text.push_str(&message);
                }
                self.log(Severity::Info, text);
            }
            TrainingEvent::EvaluationComplete(result) => {
                self.evaluation = Some(result);
                self.focus = ViewFocus::Results;
            }
            TrainingEvent::DatasetArchived { path, message } => {
                let text = if message.is_empty() { format!("Dataset archived: {path}") } else { message };
                self.log(Severity::Success, text);
            }
            TrainingEvent::WorkerError { message } => self.log(Severity::Error, message),
            TrainingEvent::Unstructured { raw_line } => self.log(Severity::Info, raw_line),
        }
        true
    }

    /// Apply one worker stderr line. Blank lines and inactive sessions are ignored.
    pub fn apply_stderr(&mut self, line: &str, filter: &StderrFilter) -> bool {
        if !self.is_running() {
            return false;
        }
        match filter.classify(line) {
            Some(severity) => {
                self.log(severity, line.trim_end().to_string());
                true
            }
            None => false,
        }
    }

    /// User-requested stop. Takes effect immediately, whether or not the process has exited yet.
    pub fn cancel(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.log(Severity::Warning, "Training cancelled by user");
        self.finish(SessionStatus::Cancelled);
        true
    }

    /// Process exit. `None` means the worker was terminated by a signal.
    ///
    /// Only a clean exit out of Running yields an [`ExperimentRecord`]. On an already
    /// terminal session this is a no-op.
    pub fn close(&mut self, exit_code: Option<i32>) -> Option<ExperimentRecord> {
        if !self.is_running() {
            return None;
        }
        self.exit_code = exit_code;
        match exit_code {
            Some(0) => {
                self.log(Severity::Success, "Training finished");
                self.finish(SessionStatus::Completed);
                self.to_record()
            }
            Some(code) => {
                self.log(Severity::Error, format!("Worker exited with code {code}"));
                self.finish(SessionStatus::Failed);
                None
            }
            None => {
                self.log(Severity::Error, "Worker terminated by signal");
                self.finish(SessionStatus::Failed);
                None
            }
        }
    }

    /// Waiting on the process itself failed; the run cannot be trusted to have finished.
    pub fn close_with_error(&mut self, message: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        self.log(Severity::Error, format!("Lost track of worker process: {message}"));
        self.finish(SessionStatus::Failed);
        true
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let Some(started) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - started).to_std().unwrap_or_default()
    }

    /// Accuracy a record would carry: latest validation accuracy, else training accuracy.
    #[must_use]
    pub fn final_accuracy(&self) -> f64 {
        self.latest.as_ref().and_then(ProgressSnapshot::best_known_accuracy).unwrap_or(0.0)
    }

    /// Summary for history. Only meaningful for a completed run.
    #[must_use]
    pub fn to_record(&self) -> Option<ExperimentRecord> {
        if self.status != SessionStatus::Completed {
            return None;
        }
        Some(ExperimentRecord {
            id: self.run_id.as_ref().map(ToString::to_string).unwrap_or_default(),
            date: self.finished_at.unwrap_or_else(Utc::now),
            final_accuracy: self.final_accuracy(),
            model: self.config.model,
            metrics: self.metrics.clone(),
            duration_secs: self.elapsed().as_secs_f64(),
        })
    }

    fn record_progress(&mut self, progress: ProgressSnapshot) {
        if let Some(last) = self.metrics.last().map(|p| p.epoch) {
            if progress.epoch <= last {
                self.metrics.retain(|p| p.epoch < progress.epoch);
                self.log(
                    Severity::Warning,
                    format!("Epoch numbering went back from {last} to {}; replacing later points", progress.epoch),
                );
            }
        }
        if self.metrics.is_empty() {
            self.focus = ViewFocus::Metrics;
        }
        self.metrics.push(MetricPoint::from(&progress));
        self.completion_percent = progress.completion_percent();
        self.latest = Some(progress);
    }

    fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        tracing::info!(run_id = ?self.run_id, %status, "session finished");
    }

    fn log(&mut self, severity: Severity, text: impl Into<String>) {
        self.logs.push(LogEntry::now(severity, text));
    }
}
