use crate::config::ModelArch;
use crate::error::{TrainingError, TrainingResult};
use crate::session::MetricPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Summary of a run that finished successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: String,
    pub date: DateTime<Utc>,
    pub final_accuracy: f64,
    pub model: ModelArch,
    pub metrics: Vec<MetricPoint>,
    #[serde(default)]
    pub duration_secs: f64,
}

impl ExperimentRecord {
    #[must_use]
    pub fn epochs(&self) -> usize {
        self.metrics.len()
    }
}

/// Most-recent-last list of completed runs. Pushing beyond capacity evicts the oldest.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentHistory {
    capacity: usize,
    records: VecDeque<ExperimentRecord>,
}

impl Default for RecentHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RecentHistory {
    /// A zero capacity is bumped to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, records: VecDeque::with_capacity(capacity) }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the evicted record, if any.
    pub fn push(&mut self, record: ExperimentRecord) -> Option<ExperimentRecord> {
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            self.records.pop_front()
        } else {
            None
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ExperimentRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&ExperimentRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ExperimentRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ExperimentRecord> {
        self.records.iter().cloned().collect()
    }

    /// Build from stored records, oldest first, keeping only the newest `capacity`.
    #[must_use]
    pub fn from_records(capacity: usize, records: Vec<ExperimentRecord>) -> Self {
        let mut history = Self::new(capacity);
        for record in records {
            history.push(record);
        }
        history
    }

    /// Load from a JSON file. A missing file is an empty history.
    pub fn load(path: &Path, capacity: usize) -> TrainingResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new(capacity)),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<ExperimentRecord> = serde_json::from_slice(&bytes).map_err(|e| {
            TrainingError::History(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Self::from_records(capacity, records))
    }

    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// One epoch of two overlaid runs. A side is `None` when that run has no point there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPoint {
    pub epoch: u32,
    pub left: Option<MetricPoint>,
    pub right: Option<MetricPoint>,
}

/// Overlay two runs by epoch. The result covers the union of both runs' epochs, in order.
#[must_use]
pub fn compare(left: &ExperimentRecord, right: &ExperimentRecord) -> Vec<ComparisonPoint> {
    let mut merged: BTreeMap<u32, ComparisonPoint> = BTreeMap::new();
    for point in &left.metrics {
        merged
            .entry(point.epoch)
            .or_insert_with(|| ComparisonPoint { epoch: point.epoch, left: None, right: None })
            .left = Some(point.clone());
    }
    for point in &right.metrics {
        merged
            .entry(point.epoch)
            .or_insert_with(|| ComparisonPoint { epoch: point.epoch, left: None, right: None })
            .right = Some(point.clone());
    }
    merged.into_values().collect()
}
