use engine_config::settings::error::SettingsError;
use engine_core::error::NotifyError;
use engine_processing::error::{ExecutorError, ResolveError, TriggerError};
use model::events::FatalKind;
use thiserror::Error;

/// Conditions that halt the run loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Batch trigger failed: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Execution failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to build notifier: {0}")]
    Notifier(#[from] NotifyError),

    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

impl OrchestratorError {
    pub fn fatal_kind(&self) -> FatalKind {
        match self {
            OrchestratorError::Trigger(_) => FatalKind::WatchFolderLost,
            OrchestratorError::Executor(ExecutorError::Runner(e)) if e.is_fatal() => {
                FatalKind::ProgramMissing
            }
            OrchestratorError::Resolve(e) if e.is_fatal() => FatalKind::ProgramMissing,
            _ => FatalKind::Other,
        }
    }

    /// Needs operator intervention on the host: watch folder or programs.
    pub fn is_environment_fatal(&self) -> bool {
        !matches!(self.fatal_kind(), FatalKind::Other)
    }
}
