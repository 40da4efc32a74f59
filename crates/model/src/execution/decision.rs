use crate::core::identity::RecordIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Ledger already holds the same content.
    Unchanged,
    /// A later file in the same batch resolved to the same identity.
    SupersededInBatch,
    /// Shutdown was requested before the file's first stage started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Unchanged => "unchanged",
            SkipReason::SupersededInBatch => "superseded-in-batch",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create,
    Update { existing_id: Option<String> },
    Skip { reason: SkipReason },
    Error { message: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update { .. } => "update",
            Action::Skip { .. } => "skip",
            Action::Error { .. } => "error",
        }
    }

    /// True for actions that invoke the external stages.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Action::Create | Action::Update { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Skip { reason } => write!(f, "skip: {reason}"),
            Action::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Resolved action for one file of a batch. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub file: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub identity: Option<RecordIdentity>,
    pub action: Action,
    /// blake3 hex digest of the file content, when it could be read.
    pub fingerprint: Option<String>,
}

impl Decision {
    pub fn new(
        file: impl Into<PathBuf>,
        timestamp: DateTime<Utc>,
        identity: Option<RecordIdentity>,
        action: Action,
    ) -> Self {
        Self {
            file: file.into(),
            timestamp,
            identity,
            action,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn superseded(mut self) -> Self {
        self.action = Action::Skip {
            reason: SkipReason::SupersededInBatch,
        };
        self
    }

    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string())
    }
}
