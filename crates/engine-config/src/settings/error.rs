use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating runtime settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The .env file could not be read.
    #[error("Failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line of the .env file is not `KEY=VALUE`.
    #[error("Invalid env file at line {line}: {reason}")]
    EnvSyntax { line: usize, reason: String },

    /// A value is present but cannot be parsed.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// One or more settings failed validation.
    #[error("Invalid settings: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
}
