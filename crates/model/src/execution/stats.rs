use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub files_extracted: u64,
    pub uploads_completed: u64,
    pub retry_count: u64,
    pub timeout_count: u64,
    pub failure_count: u64,
    pub batches_processed: u64,
}

/// What the outputs folder currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStats {
    pub output_dir: PathBuf,
    /// Record files (`*.json`) directly under `output_dir`.
    pub records: usize,
    pub last_written_at: Option<DateTime<Utc>>,
}

/// Health summary carried by the periodic reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub collected_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub watch_folder: PathBuf,
    pub outputs: OutputStats,
    pub metrics: MetricsSnapshot,
}

impl ProcessingStats {
    /// `uptime` rendered as `HhMMmSSs`, e.g. `26h03m07s`.
    pub fn uptime_display(&self) -> String {
        let secs = self.uptime_secs;
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
