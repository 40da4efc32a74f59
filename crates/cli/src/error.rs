use crate::shutdown::ExitCode;
use engine_config::settings::error::SettingsError;
use engine_runtime::error::OrchestratorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Environment check failed: {}", .0.join("; "))]
    EnvironmentCheck(Vec<String>),

    #[error("Batch deferred: {0}")]
    Deferred(String),
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Orchestrator(e) if e.is_environment_fatal() => ExitCode::FatalEnvironment,
            CliError::EnvironmentCheck(_) => ExitCode::FatalEnvironment,
            _ => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_processing::error::TriggerError;

    #[test]
    fn lost_watch_folder_maps_to_fatal_exit() {
        let err = CliError::from(OrchestratorError::from(TriggerError::WatchFolderMissing("/w".into())));
        assert_eq!(err.exit_code(), ExitCode::FatalEnvironment);
        assert_eq!(CliError::Deferred("ledger".into()).exit_code(), ExitCode::GeneralError);
        assert_eq!(
            CliError::Settings(SettingsError::ValidationFailed(vec!["x".into()])).exit_code(),
            ExitCode::GeneralError
        );
    }
}
