use crate::config::TrainingConfiguration;
use crate::error::{TrainingError, TrainingResult};
use crate::events::{EvaluationResult, ProgressSnapshot};
use crate::history::ExperimentRecord;
use crate::log::LogEntry;
use crate::session::{MetricPoint, SessionState, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bump when the exported JSON layout changes.
pub const EXPORT_VERSION: u32 = 1;

/// Everything worth keeping about a run, in one serialisable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub run_id: Option<String>,
    pub status: SessionStatus,
    pub config: TrainingConfiguration,
    pub metrics: Vec<MetricPoint>,
    pub latest_progress: Option<ProgressSnapshot>,
    pub evaluation: Option<EvaluationResult>,
    pub logs: Vec<LogEntry>,
    pub record: Option<ExperimentRecord>,
}

impl SessionExport {
    #[must_use]
    pub fn from_session(session: &SessionState) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            run_id: session.run_id.as_ref().map(ToString::to_string),
            status: session.status,
            config: session.config.clone(),
            metrics: session.metrics.clone(),
            latest_progress: session.latest.clone(),
            evaluation: session.evaluation.clone(),
            logs: session.logs.clone(),
            record: session.to_record(),
        }
    }

    pub fn to_json(&self) -> TrainingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(data: &str) -> TrainingResult<Self> {
        let export: Self = serde_json::from_str(data)?;
        if export.version > EXPORT_VERSION {
            return Err(TrainingError::Export(format!(
                "export version {} is newer than supported version {}",
                export.version, EXPORT_VERSION
            )));
        }
        Ok(export)
    }
}

/// Metric history as CSV. Absent values are empty cells.
pub fn metrics_to_csv(metrics: &[MetricPoint]) -> TrainingResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["epoch", "train_accuracy", "train_loss", "val_accuracy", "val_loss"])?;
    for point in metrics {
        writer.write_record([
            point.epoch.to_string(),
            cell(point.train_accuracy),
            cell(point.train_loss),
            cell(point.val_accuracy),
            cell(point.val_loss),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| TrainingError::Export(format!("failed to flush csv: {}", e.error())))?;
    String::from_utf8(bytes).map_err(|e| TrainingError::Export(e.to_string()))
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Destination for exported text, usually a path the user picked.
pub trait TextSink {
    fn write_text(&self, path: &Path, contents: &str) -> TrainingResult<()>;
}

/// Writes straight to the filesystem, creating parent directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsTextSink;

impl TextSink for FsTextSink {
    fn write_text(&self, path: &Path, contents: &str) -> TrainingResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}

pub fn export_session(session: &SessionState, sink: &dyn TextSink, path: &Path) -> TrainingResult<()> {
    let json = SessionExport::from_session(session).to_json()?;
    sink.write_text(path, &json)
}

pub fn export_metrics_csv(session: &SessionState, sink: &dyn TextSink, path: &Path) -> TrainingResult<()> {
    let csv = metrics_to_csv(&session.metrics)?;
    sink.write_text(path, &csv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::decode;
    use crate::run::RunId;
    use std::cell::RefCell;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MemorySink {
        written: RefCell<Vec<(PathBuf, String)>>,
    }

    impl TextSink for MemorySink {
        fn write_text(&self, path: &Path, contents: &str) -> TrainingResult<()> {
            self.written.borrow_mut().push((path.to_path_buf(), contents.to_string()));
            Ok(())
        }
    }

    fn completed_session(epochs: u32) -> SessionState {
        let mut session = SessionState::new(TrainingConfiguration::default());
        session.begin(RunId::from("exp_export"), "python train.py");
        for epoch in 1..=epochs {
            session.apply_event(decode(&format!(
                r#"{{"status":"training","epoch":{epoch},"total_epochs":{epochs},"train_accuracy":"0.5","train_loss":"0.9","val_accuracy":"0.{epoch}","val_loss":"1.0"}}"#
            )));
        }
        session.close(Some(0));
        session
    }

    #[test]
    fn test_export_round_trip_keeps_history_and_accuracy() {
        let session = completed_session(4);
        let sink = MemorySink::default();
        export_session(&session, &sink, Path::new("/exports/run.json")).unwrap();

        let written = sink.written.borrow();
        let parsed = SessionExport::from_json(&written[0].1).unwrap();
        let record = parsed.record.unwrap();
        let original = session.to_record().unwrap();

        assert_eq!(record.metrics.len(), original.metrics.len());
        assert!((record.final_accuracy - original.final_accuracy).abs() < f64::EPSILON);
        assert_eq!(parsed.status, SessionStatus::Completed);
    }

    #[test]
    fn test_metrics_csv_leaves_absent_values_empty() {
        let metrics = vec![MetricPoint {
            epoch: 1,
            train_accuracy: Some(0.5),
            train_loss: None,
            val_accuracy: Some(0.25),
            val_loss: None,
        }];
        let csv = metrics_to_csv(&metrics).unwrap();
        assert_eq!(csv, "epoch,train_accuracy,train_loss,val_accuracy,val_loss\n1,0.5,,0.25,\n");
    }

    #[test]
    fn test_rejects_newer_export_version() {
        let mut export = SessionExport::from_session(&completed_session(1));
        export.version = EXPORT_VERSION + 1;
        let json = serde_json::to_string(&export).unwrap();
        assert!(SessionExport::from_json(&json).is_err());
    }

    #[test]
    fn test_fs_sink_creates_parent_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("a").join("b").join("metrics.csv");
        export_metrics_csv(&completed_session(2), &FsTextSink, &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("epoch,"));
    }
}
