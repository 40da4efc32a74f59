use crate::{
    error::RunnerError,
    process::{CommandSpec, run_command},
};
use async_trait::async_trait;
use model::execution::step::{Stage, StepResult, StepStatus};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tracing::{debug, warn};

/// Invokes one external stage. Performs no retry; callers own the policy.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(
        &self,
        stage: Stage,
        args: &[String],
        timeout: Duration,
    ) -> Result<StepResult, RunnerError>;
}

/// External program bound to a stage.
#[derive(Debug, Clone)]
pub struct StepProgram {
    pub program: String,
    pub working_dir: Option<PathBuf>,
}

impl StepProgram {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }
}

/// Runs stages as child processes resolved from configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessStepRunner {
    programs: HashMap<Stage, StepProgram>,
}

impl ProcessStepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, stage: Stage, program: StepProgram) -> Self {
        self.programs.insert(stage, program);
        self
    }

    pub fn program(&self, stage: Stage) -> Option<&StepProgram> {
        self.programs.get(&stage)
    }
}

#[async_trait]
impl StepRunner for ProcessStepRunner {
    async fn run(
        &self,
        stage: Stage,
        args: &[String],
        timeout: Duration,
    ) -> Result<StepResult, RunnerError> {
        let program = self
            .programs
            .get(&stage)
            .ok_or_else(|| RunnerError::Unconfigured(stage.to_string()))?;

        let spec = CommandSpec::new(program.program.clone(), args.to_vec())
            .in_dir(program.working_dir.clone());
        let output = run_command(&spec, timeout).await?;

        let status = if output.timed_out {
            warn!(%stage, timeout_secs = timeout.as_secs(), "Stage timed out");
            StepStatus::Timeout
        } else if output.exit_code == Some(0) {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        debug!(%stage, %status, exit_code = ?output.exit_code, duration_ms = output.duration.as_millis() as u64, "Stage finished");

        let mut result = StepResult::new(stage, status);
        result.exit_code = output.exit_code;
        result.stdout = output.stdout;
        result.stderr = output.stderr;
        result.duration = output.duration;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with(script: &str) -> ProcessStepRunner {
        ProcessStepRunner::new()
            .with_program(Stage::Extract, StepProgram::new("sh"))
            .with_program(Stage::Upload, StepProgram::new(script))
    }

    fn args(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn classifies_exit_codes() {
        let runner = runner_with("unused");
        let ok = runner
            .run(Stage::Extract, &args("exit 0"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok.status, StepStatus::Success);

        let failed = runner
            .run(Stage::Extract, &args("echo nope >&2; exit 1"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.detail(), "exit code 1: nope");
    }

    #[tokio::test]
    async fn classifies_timeouts() {
        let runner = runner_with("unused");
        let result = runner
            .run(Stage::Extract, &args("sleep 3"), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(result.status, StepStatus::Timeout);
        assert_eq!(result.stage, Stage::Extract);
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let runner = runner_with("/nonexistent/upload-tool");
        let err = runner
            .run(Stage::Upload, &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unconfigured_stage_is_an_error() {
        let runner = ProcessStepRunner::new();
        let err = runner
            .run(Stage::Upload, &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Unconfigured(_)));
    }
}
