//! Kiln Training
//!
//! Process-free building blocks for driving an external image-classifier trainer:
//! - Describing a run (`TrainingConfiguration`, `ConfigDraft`, `ModelArch`)
//! - Building the worker command line (`build_worker_args`)
//! - Decoding the worker's JSON-lines stdout (`decode`, `TrainingEvent`)
//! - Tracking one run (`SessionState`) and finished runs (`RecentHistory`)
//! - Exporting a run (`SessionExport`, `metrics_to_csv`)

pub mod args;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod history;
pub mod log;
pub mod run;
pub mod session;

pub use args::build_worker_args;
pub use config::{ConfigDraft, ExecutionEnvironment, ModelArch, TrainingConfiguration};
pub use error::{TrainingError, TrainingResult};
pub use events::{ClassMetrics, ClassificationReport, EvaluationResult, ProgressSnapshot, TrainingEvent, decode};
pub use export::{FsTextSink, SessionExport, TextSink, export_metrics_csv, export_session, metrics_to_csv};
pub use history::{ComparisonPoint, ExperimentRecord, RecentHistory, compare};
pub use log::{LogEntry, Severity, StderrFilter};
pub use run::{RunId, RunInvocation};
pub use session::{MetricPoint, SessionState, SessionStatus, ViewFocus};
