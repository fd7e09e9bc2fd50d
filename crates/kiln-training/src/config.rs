use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_EPOCHS: u32 = 10;
pub const DEFAULT_BATCH_SIZE: u32 = 32;
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
pub const DEFAULT_PATIENCE: u32 = 5;
/// Worker-count sentinel asking the worker to pick a value itself.
pub const AUTO_WORKERS: i32 = -1;

/// Architectures the external worker knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelArch {
    #[default]
    Resnet18,
    Resnet50,
    EfficientnetB0,
    Dcn,
    Eva02,
    MobilenetV3,
    #[serde(rename = "vit_b_16")]
    VitB16,
    Convnext,
}

impl ModelArch {
    pub const ALL: [ModelArch; 8] = [
        ModelArch::Resnet18,
        ModelArch::Resnet50,
        ModelArch::EfficientnetB0,
        ModelArch::Dcn,
        ModelArch::Eva02,
        ModelArch::MobilenetV3,
        ModelArch::VitB16,
        ModelArch::Convnext,
    ];

    /// Identifier passed to the worker's `--model` flag.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            ModelArch::Resnet18 => "resnet18",
            ModelArch::Resnet50 => "resnet50",
            ModelArch::EfficientnetB0 => "efficientnet_b0",
            ModelArch::Dcn => "dcn",
            ModelArch::Eva02 => "eva02",
            ModelArch::MobilenetV3 => "mobilenet_v3",
            ModelArch::VitB16 => "vit_b_16",
            ModelArch::Convnext => "convnext",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ModelArch::Resnet18 => "ResNet18 (Standard)",
            ModelArch::Resnet50 => "ResNet50 (Deep)",
            ModelArch::EfficientnetB0 => "EfficientNet-B0 (Efficient)",
            ModelArch::Dcn => "Deformable CNN (Advanced)",
            ModelArch::Eva02 => "EVA-02 ViT (Transformer)",
            ModelArch::MobilenetV3 => "MobileNetV3 (Mobile)",
            ModelArch::VitB16 => "ViT-B/16 (Vision Transformer)",
            ModelArch::Convnext => "ConvNeXt (Modern ConvNet)",
        }
    }
}

impl std::fmt::Display for ModelArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModelArch {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ModelArch::ALL
            .into_iter()
            .find(|arch| arch.id() == wanted)
            .ok_or_else(|| TrainingError::InvalidConfig(format!("unknown model: {s}")))
    }
}

/// Where the worker runs: the system interpreter or a named isolated environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ExecutionEnvironment {
    #[default]
    System,
    Named(String),
}

impl ExecutionEnvironment {
    /// `None`, empty, and `"system"` all select the system interpreter.
    #[must_use]
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            None | Some("" | "system") => ExecutionEnvironment::System,
            Some(name) => ExecutionEnvironment::Named(name.to_string()),
        }
    }
}

/// Everything the worker needs for one run. Fixed once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfiguration {
    pub dataset_path: PathBuf,
    /// Empty means "let the worker choose".
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub model: ModelArch,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    /// -1 = auto, 0 = load data synchronously.
    pub num_workers: i32,
    pub patience: u32,
    #[serde(default)]
    pub resume_checkpoint: Option<PathBuf>,
    #[serde(default)]
    pub generate_archive: bool,
    #[serde(default)]
    pub archive_only: bool,
    #[serde(default)]
    pub environment: ExecutionEnvironment,
}

impl Default for TrainingConfiguration {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::new(),
            save_path: String::new(),
            model: ModelArch::default(),
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            num_workers: AUTO_WORKERS,
            patience: DEFAULT_PATIENCE,
            resume_checkpoint: None,
            generate_archive: false,
            archive_only: false,
            environment: ExecutionEnvironment::System,
        }
    }
}

impl TrainingConfiguration {
    /// Strict checks for callers that want them. Argument building never calls this.
    pub fn validate(&self) -> TrainingResult<()> {
        if self.dataset_path.as_os_str().is_empty() {
            return Err(TrainingError::InvalidConfig("dataset path is required".to_string()));
        }
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig("learning_rate must be > 0".to_string()));
        }
        if self.num_workers < AUTO_WORKERS {
            return Err(TrainingError::InvalidConfig("num_workers must be >= -1".to_string()));
        }
        if self.patience == 0 {
            return Err(TrainingError::InvalidConfig("patience must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Raw, possibly half-typed form input.
///
/// `resolve` never fails: anything that does not parse falls back to a default so
/// partial input never blocks starting a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDraft {
    pub dataset_path: String,
    pub save_path: String,
    pub model: String,
    pub epochs: String,
    pub batch_size: String,
    pub learning_rate: String,
    pub num_workers: String,
    pub patience: String,
    pub resume_checkpoint: String,
    pub generate_archive: bool,
    pub archive_only: bool,
    pub environment: String,
}

impl ConfigDraft {
    #[must_use]
    pub fn resolve(&self) -> TrainingConfiguration {
        TrainingConfiguration {
            dataset_path: PathBuf::from(self.dataset_path.trim()),
            save_path: self.save_path.trim().to_string(),
            model: self.model.parse().unwrap_or_default(),
            epochs: coerce_positive(&self.epochs, DEFAULT_EPOCHS),
            batch_size: coerce_positive(&self.batch_size, DEFAULT_BATCH_SIZE),
            learning_rate: coerce_rate(&self.learning_rate),
            num_workers: coerce_workers(&self.num_workers),
            patience: coerce_positive(&self.patience, DEFAULT_PATIENCE),
            resume_checkpoint: non_blank(&self.resume_checkpoint).map(PathBuf::from),
            generate_archive: self.generate_archive,
            archive_only: self.archive_only,
            environment: ExecutionEnvironment::from_selector(Some(&self.environment)),
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn coerce_positive(value: &str, default: u32) -> u32 {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => default,
    }
}

fn coerce_rate(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => rate,
        _ => DEFAULT_LEARNING_RATE,
    }
}

fn coerce_workers(value: &str) -> i32 {
    match value.trim().parse::<i32>() {
        Ok(n) if n >= AUTO_WORKERS => n,
        _ => AUTO_WORKERS,
    }
}
