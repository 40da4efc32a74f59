use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Created,
    Modified,
}

/// A single filesystem observation for a candidate file.
///
/// Ephemeral: produced by the watch source, consumed by the batch trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp,
        }
    }

    pub fn created(path: impl Into<PathBuf>, timestamp: DateTime<Utc>) -> Self {
        Self::new(path, WatchEventKind::Created, timestamp)
    }

    pub fn modified(path: impl Into<PathBuf>, timestamp: DateTime<Utc>) -> Self {
        Self::new(path, WatchEventKind::Modified, timestamp)
    }

    /// Lower-cased extension of the event path, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
