use engine_core::error::{LedgerError, RunnerError};
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that stop the batch trigger. None of them heal on their own.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Watch folder is missing or no longer a directory: {0}")]
    WatchFolderMissing(PathBuf),

    #[error("Filesystem watch backend failed: {0}")]
    Backend(String),

    #[error("Watch event queue closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("No date found for {file}")]
    NotFound { file: PathBuf },

    #[error("Identity probe failed for {file}: {detail}")]
    Step { file: PathBuf, detail: String },

    #[error("Identity probe could not run: {0}")]
    Runner(#[from] RunnerError),
}

impl ProbeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::Runner(e) if e.is_fatal())
    }
}

/// Batch-level resolution failures. Per-file problems become error decisions.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Ledger query failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Identity probe failed fatally: {0}")]
    Probe(#[source] ProbeError),

    #[error("Resolution stopped by shutdown request")]
    Cancelled,
}

impl ResolveError {
    /// Ledger failures defer the batch; everything else halts the run loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            ResolveError::Ledger(e) => matches!(e, LedgerError::Runner(r) if r.is_fatal()),
            ResolveError::Probe(_) => true,
            ResolveError::Cancelled => false,
        }
    }
}

/// Executor failures that must halt the run loop. Stage failures are
/// reported through the file outcome instead.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Stage could not run: {0}")]
    Runner(#[from] RunnerError),
}
