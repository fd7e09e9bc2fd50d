//! Worker stdout protocol: one JSON object per line, discriminated by `status`.
//!
//! Decoding never fails. Anything that is not a recognised record (stray prints,
//! library warnings, truncated JSON) comes back as [`TrainingEvent::Unstructured`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key of the aggregate row in a classification report.
pub const WEIGHTED_AVG: &str = "weighted avg";

/// One decoded stdout line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingEvent {
    Progress(ProgressSnapshot),
    Checkpoint { message: String, path: String },
    EarlyStopped { epoch: Option<u32>, message: String },
    Resumed { epoch: Option<u32>, best_accuracy: Option<f64>, message: String },
    EvaluationComplete(EvaluationResult),
    DatasetArchived { path: String, message: String },
    WorkerError { message: String },
    Unstructured { raw_line: String },
}

/// Metrics for one finished epoch. Absent values mean "not available yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub epoch: u32,
    pub total_epochs: u32,
    pub train_accuracy: Option<f64>,
    pub train_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub val_loss: Option<f64>,
    pub learning_rate: Option<f64>,
}

impl ProgressSnapshot {
    /// `epoch / total_epochs` as a percentage, capped at 100.
    #[must_use]
    pub fn completion_percent(&self) -> f64 {
        if self.total_epochs == 0 {
            return 0.0;
        }
        (f64::from(self.epoch) * 100.0 / f64::from(self.total_epochs)).min(100.0)
    }

    /// Validation accuracy when the worker reported one, else training accuracy.
    #[must_use]
    pub fn best_known_accuracy(&self) -> Option<f64> {
        self.val_accuracy.or(self.train_accuracy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub report: ClassificationReport,
    pub confusion_matrix_path: String,
    pub total_epochs: Option<u32>,
    pub test_size: Option<u64>,
}

/// Per-class precision/recall/f1/support rows plus scalar rows such as `accuracy`.
///
/// Serialises back to the worker's flat map shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ReportEntry>", into = "BTreeMap<String, ReportEntry>")]
pub struct ClassificationReport {
    pub classes: BTreeMap<String, ClassMetrics>,
    pub scalars: BTreeMap<String, f64>,
}

impl ClassificationReport {
    #[must_use]
    pub fn weighted_avg(&self) -> Option<&ClassMetrics> {
        self.classes.get(WEIGHTED_AVG)
    }

    /// Real class rows, without the `macro avg` / `weighted avg` aggregates.
    pub fn labels(&self) -> impl Iterator<Item = (&String, &ClassMetrics)> {
        self.classes.iter().filter(|(name, _)| !name.ends_with(" avg"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub precision: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub recall: Option<f64>,
    #[serde(default, rename = "f1-score", deserialize_with = "lenient_f64")]
    pub f1_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub support: Option<f64>,
}

/// One value of the worker's report map, before it is split into rows and scalars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportEntry {
    Class(ClassMetrics),
    Scalar(f64),
    Other(Value),
}

impl From<BTreeMap<String, ReportEntry>> for ClassificationReport {
    fn from(entries: BTreeMap<String, ReportEntry>) -> Self {
        let mut report = ClassificationReport::default();
        for (key, entry) in entries {
            match entry {
                ReportEntry::Class(metrics) => {
                    report.classes.insert(key, metrics);
                }
                ReportEntry::Scalar(value) => {
                    report.scalars.insert(key, value);
                }
                ReportEntry::Other(_) => {}
            }
        }
        report
    }
}

impl From<ClassificationReport> for BTreeMap<String, ReportEntry> {
    fn from(report: ClassificationReport) -> Self {
        let mut entries: BTreeMap<String, ReportEntry> = report
            .classes
            .into_iter()
            .map(|(key, metrics)| (key, ReportEntry::Class(metrics)))
            .collect();
        entries.extend(report.scalars.into_iter().map(|(key, value)| (key, ReportEntry::Scalar(value))));
        entries
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WireRecord {
    Training {
        #[serde(default, deserialize_with = "lenient_u32")]
        epoch: Option<u32>,
        #[serde(default, deserialize_with = "lenient_u32")]
        total_epochs: Option<u32>,
        #[serde(default, deserialize_with = "lenient_f64")]
        train_accuracy: Option<f64>,
        #[serde(default, deserialize_with = "lenient_f64")]
        train_loss: Option<f64>,
        #[serde(default, deserialize_with = "lenient_f64")]
        val_accuracy: Option<f64>,
        #[serde(default, deserialize_with = "lenient_f64")]
        val_loss: Option<f64>,
        #[serde(default, deserialize_with = "lenient_f64")]
        learning_rate: Option<f64>,
    },
    Checkpoint {
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
        #[serde(default, deserialize_with = "lenient_string")]
        path: String,
    },
    EvaluationComplete {
        #[serde(default)]
        report: ClassificationReport,
        #[serde(default, deserialize_with = "lenient_string")]
        confusion_matrix_path: String,
        #[serde(default, deserialize_with = "lenient_u32")]
        total_epochs: Option<u32>,
        #[serde(default, deserialize_with = "lenient_u64")]
        test_size: Option<u64>,
    },
    DatasetZip {
        #[serde(default, alias = "zip_path", deserialize_with = "lenient_string")]
        path: String,
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
    },
    StoppedEarly {
        #[serde(default, deserialize_with = "lenient_u32")]
        epoch: Option<u32>,
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
    },
    Resumed {
        #[serde(default, deserialize_with = "lenient_u32")]
        epoch: Option<u32>,
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
        #[serde(default, alias = "best_accuracy", deserialize_with = "lenient_f64")]
        best_acc: Option<f64>,
    },
    Error {
        #[serde(default, deserialize_with = "lenient_string")]
        message: String,
    },
}

impl WireRecord {
    fn into_event(self) -> Option<TrainingEvent> {
        let event = match self {
            WireRecord::Training {
                epoch,
                total_epochs,
                train_accuracy,
                train_loss,
                val_accuracy,
                val_loss,
                learning_rate,
            } => TrainingEvent::Progress(ProgressSnapshot {
                epoch: epoch?,
                total_epochs: total_epochs.unwrap_or(0),
                train_accuracy,
                train_loss,
                val_accuracy,
                val_loss,
                learning_rate,
            }),
            WireRecord::Checkpoint { message, path } => TrainingEvent::Checkpoint { message, path },
            WireRecord::EvaluationComplete { report, confusion_matrix_path, total_epochs, test_size } => {
                TrainingEvent::EvaluationComplete(EvaluationResult {
                    report,
                    confusion_matrix_path,
                    total_epochs,
                    test_size,
                })
            }
            WireRecord::DatasetZip { path, message } => TrainingEvent::DatasetArchived { path, message },
            WireRecord::StoppedEarly { epoch, message } => TrainingEvent::EarlyStopped { epoch, message },
            WireRecord::Resumed { epoch, message, best_acc } => TrainingEvent::Resumed {
                epoch: epoch.or_else(|| epoch_from_message(&message)),
                best_accuracy: best_acc,
                message,
            },
            WireRecord::Error { message } => TrainingEvent::WorkerError { message },
        };
        Some(event)
    }
}

/// Decode one stdout line. Always yields exactly one event.
#[must_use]
pub fn decode(line: &str) -> TrainingEvent {
    let unstructured = || TrainingEvent::Unstructured { raw_line: line.to_string() };

    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return unstructured();
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        _ => return unstructured(),
    };
    if !value.get("status").is_some_and(Value::is_string) {
        return unstructured();
    }

    match serde_json::from_value::<WireRecord>(value) {
        Ok(record) => record.into_event().unwrap_or_else(unstructured),
        Err(e) => {
            tracing::debug!(error = %e, "unrecognised worker record");
            unstructured()
        }
    }
}

static EPOCH_WORD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)epoch\D{0,3}(\d+)").ok());
static NUMBER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").ok());

/// Pull the epoch out of free text like `"Resumed from epoch 7 (best acc 0.81)"`.
fn epoch_from_message(message: &str) -> Option<u32> {
    let labelled = EPOCH_WORD
        .as_ref()
        .and_then(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());
    // Decimals are accuracies or losses, never an epoch.
    labelled.or_else(|| {
        NUMBER
            .as_ref()?
            .find_iter(message)
            .find(|m| !m.as_str().contains('.'))
            .and_then(|m| m.as_str().parse().ok())
    })
}

fn number_from_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn whole_from_value(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let n = number_from_value(value)?;
    (n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64).then_some(n as u64)
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(whole_from_value))
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(lenient_u64(deserializer)?.and_then(|n| u32::try_from(n).ok()))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_training_with_numeric_strings() {
        let line = r#"{"status":"training","epoch":1,"total_epochs":5,"train_accuracy":"0.42","train_loss":"1.3","val_accuracy":"0.40","val_loss":"1.4"}"#;
        let TrainingEvent::Progress(progress) = decode(line) else {
            panic!("expected progress");
        };
        assert_eq!(progress.epoch, 1);
        assert_eq!(progress.total_epochs, 5);
        assert_eq!(progress.train_accuracy, Some(0.42));
        assert_eq!(progress.val_loss, Some(1.4));
        assert_eq!(progress.learning_rate, None);
        assert!((progress.completion_percent() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_training_with_garbage_metric_is_absent() {
        let line = r#"{"status":"training","epoch":"2","total_epochs":4,"train_accuracy":"n/a","learning_rate":0.001}"#;
        let TrainingEvent::Progress(progress) = decode(line) else {
            panic!("expected progress");
        };
        assert_eq!(progress.epoch, 2);
        assert_eq!(progress.train_accuracy, None);
        assert_eq!(progress.learning_rate, Some(0.001));
    }

    #[test]
    fn test_decode_training_without_epoch_degrades() {
        let line = r#"{"status":"training","total_epochs":4}"#;
        assert_eq!(decode(line), TrainingEvent::Unstructured { raw_line: line.to_string() });
    }

    #[test]
    fn test_decode_plain_text_is_unstructured() {
        assert_eq!(
            decode("not json at all"),
            TrainingEvent::Unstructured { raw_line: "not json at all".to_string() }
        );
    }

    #[test]
    fn test_decode_degrades_on_malformed_and_unknown_input() {
        let inputs = [
            "",
            "{",
            "{\"status\":",
            "[1,2,3]",
            "{\"epoch\":1}",
            "{\"status\":42}",
            "{\"status\":\"warming_up\"}",
            "{\"status\":\"error\",\"message\":{\"nested\":true}}x",
        ];
        for input in inputs {
            assert_eq!(
                decode(input),
                TrainingEvent::Unstructured { raw_line: input.to_string() },
                "input: {input}"
            );
        }
    }

    #[test]
    fn test_decode_checkpoint_and_error() {
        assert_eq!(
            decode(r#"{"status":"checkpoint","message":"Saved best model","path":"/m/best.pth"}"#),
            TrainingEvent::Checkpoint {
                message: "Saved best model".to_string(),
                path: "/m/best.pth".to_string()
            }
        );
        assert_eq!(
            decode(r#"{"status":"error","message":"CUDA out of memory"}"#),
            TrainingEvent::WorkerError { message: "CUDA out of memory".to_string() }
        );
    }

    #[test]
    fn test_decode_resumed_reads_epoch_from_message() {
        let event = decode(r#"{"status":"resumed","message":"Resumed from epoch 7","best_acc":"0.81"}"#);
        assert_eq!(
            event,
            TrainingEvent::Resumed {
                epoch: Some(7),
                best_accuracy: Some(0.81),
                message: "Resumed from epoch 7".to_string()
            }
        );
    }

    #[test]
    fn test_resumed_epoch_ignores_accuracy_digits() {
        let event = decode(r#"{"status":"resumed","message":"Resumed (best acc 0.81)"}"#);
        assert!(matches!(event, TrainingEvent::Resumed { epoch: None, .. }));

        let event = decode(r#"{"status":"resumed","message":"Resumed at 0.81 accuracy, continuing from 12"}"#);
        assert!(matches!(event, TrainingEvent::Resumed { epoch: Some(12), .. }));
    }

    #[test]
    fn test_decode_stopped_early_and_dataset_zip() {
        assert_eq!(
            decode(r#"{"status":"stopped_early","epoch":12,"message":"No improvement"}"#),
            TrainingEvent::EarlyStopped { epoch: Some(12), message: "No improvement".to_string() }
        );
        assert_eq!(
            decode(r#"{"status":"dataset_zip","path":"/out/data.zip"}"#),
            TrainingEvent::DatasetArchived { path: "/out/data.zip".to_string(), message: String::new() }
        );
    }

    #[test]
    fn test_decode_evaluation_report() {
        let line = r#"{"status":"evaluation_complete","report":{"cat":{"precision":0.9,"recall":0.8,"f1-score":0.85,"support":10},"dog":{"precision":"0.7","recall":0.75,"f1-score":0.72,"support":12},"accuracy":0.78,"weighted avg":{"precision":0.79,"recall":0.78,"f1-score":0.78,"support":22}},"confusion_matrix_path":"/out/cm.png","total_epochs":5,"test_size":22}"#;
        let TrainingEvent::EvaluationComplete(result) = decode(line) else {
            panic!("expected evaluation");
        };
        assert_eq!(result.test_size, Some(22));
        assert_eq!(result.report.scalars.get("accuracy"), Some(&0.78));
        assert_eq!(result.report.weighted_avg().and_then(|m| m.precision), Some(0.79));
        assert_eq!(result.report.labels().count(), 2);
        assert_eq!(result.report.classes["dog"].precision, Some(0.7));
    }

    #[test]
    fn test_report_serialises_to_flat_shape() {
        let line = r#"{"status":"evaluation_complete","report":{"cat":{"precision":0.9},"accuracy":0.5}}"#;
        let TrainingEvent::EvaluationComplete(result) = decode(line) else {
            panic!("expected evaluation");
        };
        let json = serde_json::to_value(&result.report).unwrap();
        assert_eq!(json["accuracy"], serde_json::json!(0.5));
        assert_eq!(json["cat"]["precision"], serde_json::json!(0.9));

        let back: ClassificationReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, result.report);
    }
}
