use crate::core::identifiers::BatchId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One settled file inside a batch, carrying the latest timestamp seen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl BatchEntry {
    pub fn new(path: impl Into<PathBuf>, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            timestamp,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Quiescence-bounded group of files ready for one pipeline run.
///
/// Entries are ordered by timestamp, then path. Immutable once formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    id: BatchId,
    entries: Vec<BatchEntry>,
    closed_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(mut entries: Vec<BatchEntry>, closed_at: DateTime<Utc>) -> Self {
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        let id = BatchId::derive(
            entries
                .iter()
                .map(|e| (e.path.as_path(), e.timestamp.timestamp_millis())),
        );
        Self {
            id,
            entries,
            closed_at,
        }
    }

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<BatchEntry> {
        self.entries
    }

    pub fn closed_at(&self) -> DateTime<Utc> {
        self.closed_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.path.as_path())
    }
}
