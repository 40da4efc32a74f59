use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// Failures of the runner itself, as opposed to a stage that ran and failed.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("External program not found: {program}")]
    ProgramNotFound { program: String },

    #[error("No program configured for stage '{0}'")]
    Unconfigured(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    /// Missing binaries need operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::ProgramNotFound { .. } | RunnerError::Unconfigured(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ledger query exited with {exit_code:?}: {detail}")]
    QueryFailed {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("Ledger output is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to read ledger output {path}: {source}")]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger query could not run: {0}")]
    Runner(#[from] RunnerError),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Timeout(_) | LedgerError::QueryFailed { .. } => true,
            LedgerError::Runner(e) => !e.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook responded with status {0}")]
    Status(u16),

    #[error("{failed} of {total} notification sinks failed")]
    Partial { failed: usize, total: usize },
}
