use crate::{
    core::identity::RecordIdentity,
    execution::{stats::ProcessingStats, step::Stage, summary::RunSummary},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, path::PathBuf};

/// A trait for events that can be handed to a notification sink.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// Contiguous run of missing identities, bounded by the known neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSpan {
    pub after: Option<RecordIdentity>,
    pub before: Option<RecordIdentity>,
    pub missing: Vec<RecordIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    WatchFolderLost,
    ProgramMissing,
    Other,
}

/// Structured records delivered to notification sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum NotificationEvent {
    BatchCompleted(RunSummary),
    FileFailed {
        file: PathBuf,
        stage: Option<Stage>,
        detail: String,
    },
    GapReport {
        missing: Vec<RecordIdentity>,
        spans: Vec<GapSpan>,
    },
    FatalError {
        kind: FatalKind,
        detail: String,
    },
    /// Periodic nudge to keep scanning, with the current pipeline stats.
    Reminder(ProcessingStats),
}

impl Event for NotificationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::BatchCompleted(_) => "batch.completed",
            NotificationEvent::FileFailed { .. } => "file.failed",
            NotificationEvent::GapReport { .. } => "gaps.detected",
            NotificationEvent::FatalError { .. } => "run.fatal",
            NotificationEvent::Reminder(_) => "reminder",
        }
    }
}
