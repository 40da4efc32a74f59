use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => f.write_str("extract"),
            Stage::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Timeout,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => f.write_str("success"),
            StepStatus::Failed => f.write_str("failed"),
            StepStatus::Timeout => f.write_str("timeout"),
        }
    }
}

/// Outcome of one external stage invocation, or of the last attempt when
/// the executor retried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub stage: Stage,
    pub status: StepStatus,
    pub attempts: u32,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Artifact produced by the stage (the record path for extract).
    pub artifact: Option<PathBuf>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl StepResult {
    pub fn new(stage: Stage, status: StepStatus) -> Self {
        Self {
            stage,
            status,
            attempts: 1,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            artifact: None,
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    /// Short human-readable reason for a non-successful result.
    pub fn detail(&self) -> String {
        match self.status {
            StepStatus::Success => "ok".to_string(),
            StepStatus::Timeout => format!("{} timed out after {:?}", self.stage, self.duration),
            StepStatus::Failed => {
                let tail = self.stderr.lines().rev().find(|l| !l.trim().is_empty());
                match (self.exit_code, tail) {
                    (Some(code), Some(line)) => format!("exit code {code}: {}", line.trim()),
                    (Some(code), None) => format!("exit code {code}"),
                    (None, Some(line)) => line.trim().to_string(),
                    (None, None) => format!("{} failed", self.stage),
                }
            }
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_detail_uses_last_stderr_line() {
        let mut result = StepResult::new(Stage::Upload, StepStatus::Failed);
        result.exit_code = Some(2);
        result.stderr = "connecting\nrate limited\n\n".into();
        assert_eq!(result.detail(), "exit code 2: rate limited");
    }

    #[test]
    fn timeout_detail_names_stage() {
        let mut result = StepResult::new(Stage::Extract, StepStatus::Timeout);
        result.duration = Duration::from_secs(3);
        assert_eq!(result.detail(), "extract timed out after 3s");
    }
}
