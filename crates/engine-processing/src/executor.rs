//! Pipeline Executor: extract then upload, each stage retried with backoff.

use crate::{
    args::{ArgTemplate, ArgVars},
    artifacts,
    error::ExecutorError,
    retry::{classify_runner_error, classify_step_result},
};
use engine_core::{
    metrics::Metrics,
    retry::{RetryDisposition, RetryPolicy},
    runner::StepRunner,
};
use model::execution::{
    decision::{Action, Decision, SkipReason},
    step::{Stage, StepResult, StepStatus},
    summary::{FileOutcome, FileStatus},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub output_dir: PathBuf,
    pub extract_args: ArgTemplate,
    pub upload_args: ArgTemplate,
    pub extract_timeout: Duration,
    pub upload_timeout: Duration,
    pub policy: RetryPolicy,
}

pub struct PipelineExecutor {
    runner: Arc<dyn StepRunner>,
    config: ExecutorConfig,
    metrics: Metrics,
}

impl PipelineExecutor {
    pub fn new(runner: Arc<dyn StepRunner>, config: ExecutorConfig, metrics: Metrics) -> Self {
        Self {
            runner,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Drives one decision to a terminal outcome.
    ///
    /// Only a runner failure that needs an operator (missing program) is
    /// returned as an error; stage failures end up in the outcome.
    pub async fn execute(&self, decision: &Decision, cancel: &CancellationToken) -> Result<FileOutcome, ExecutorError> {
        let file = decision.file.clone();
        let outcome = |status: FileStatus, steps: Vec<StepResult>| FileOutcome {
            file: file.clone(),
            identity: decision.identity,
            action: decision.action.clone(),
            status,
            steps,
        };

        let existing_id = match &decision.action {
            Action::Skip { reason } => return Ok(outcome(FileStatus::Skipped { reason: *reason }, vec![])),
            Action::Error { message } => {
                self.metrics.increment_failures(1);
                return Ok(outcome(
                    FileStatus::Failed {
                        stage: None,
                        detail: message.clone(),
                    },
                    vec![],
                ));
            }
            Action::Create => None,
            Action::Update { existing_id } => existing_id.as_deref(),
        };

        if cancel.is_cancelled() {
            return Ok(outcome(cancelled(), vec![]));
        }

        let record = artifacts::record_path(&self.config.output_dir, &decision.file);
        if let Err(e) = tokio::fs::create_dir_all(&self.config.output_dir).await {
            self.metrics.increment_failures(1);
            return Ok(outcome(
                FileStatus::Failed {
                    stage: Some(Stage::Extract),
                    detail: format!("cannot create {}: {e}", self.config.output_dir.display()),
                },
                vec![],
            ));
        }

        let vars = ArgVars::new()
            .input(&decision.file)
            .output(&record)
            .record(&record)
            .identity(decision.identity)
            .action(decision.action.name())
            .record_id(existing_id)
            .content_hash(decision.fingerprint.as_deref());

        let mut steps = Vec::with_capacity(2);
        let extract = self
            .run_stage(
                Stage::Extract,
                self.config.extract_args.render(&vars),
                self.config.extract_timeout,
                Some(&record),
                cancel,
            )
            .await?;
        let extracted = extract.is_success();
        let extract_detail = extract.detail();
        steps.push(extract);
        if !extracted {
            return Ok(self.failed(outcome, Stage::Extract, extract_detail, steps));
        }
        self.metrics.increment_extracted(1);

        if cancel.is_cancelled() {
            info!(file = %decision.file_name(), "Stopping before upload");
            return Ok(outcome(cancelled(), steps));
        }

        let upload = self
            .run_stage(
                Stage::Upload,
                self.config.upload_args.render(&vars),
                self.config.upload_timeout,
                None,
                cancel,
            )
            .await?;
        let uploaded = upload.is_success();
        let upload_detail = upload.detail();
        steps.push(upload);
        if !uploaded {
            return Ok(self.failed(outcome, Stage::Upload, upload_detail, steps));
        }
        self.metrics.increment_uploads(1);

        info!(
            file = %decision.file_name(),
            action = decision.action.name(),
            identity = ?decision.identity.map(|i| i.to_string()),
            "File processed"
        );
        Ok(outcome(FileStatus::Succeeded, steps))
    }

    fn failed(
        &self,
        outcome: impl Fn(FileStatus, Vec<StepResult>) -> FileOutcome,
        stage: Stage,
        detail: String,
        steps: Vec<StepResult>,
    ) -> FileOutcome {
        self.metrics.increment_failures(1);
        outcome(
            FileStatus::Failed {
                stage: Some(stage),
                detail,
            },
            steps,
        )
    }

    /// Runs a stage until it succeeds, fails permanently, exhausts the retry
    /// policy or shutdown is requested between attempts.
    ///
    /// When the stage produces an artifact, any leftover from an earlier
    /// attempt is removed first, and a successful run that left no artifact
    /// counts as a failed attempt.
    async fn run_stage(
        &self,
        stage: Stage,
        args: Vec<String>,
        timeout: Duration,
        artifact: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<StepResult, ExecutorError> {
        let policy = &self.config.policy;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let cleared = match artifact {
                Some(path) => artifacts::clear_stale(path).await.map_err(|e| (path, e)),
                None => Ok(()),
            };
            let outcome = match cleared {
                Ok(()) => self.runner.run(stage, &args, timeout).await,
                Err((path, e)) => {
                    let mut result = StepResult::new(stage, StepStatus::Failed);
                    result.stderr = format!("cannot remove stale artifact {}: {e}", path.display());
                    Ok(result)
                }
            };
            let mut result = match outcome {
                Ok(result) => result,
                Err(e) if classify_runner_error(&e) == RetryDisposition::Stop => {
                    return Err(ExecutorError::Runner(e));
                }
                Err(e) => {
                    let mut result = StepResult::new(stage, StepStatus::Failed);
                    result.stderr = e.to_string();
                    result
                }
            };
            result.attempts = attempt as u32;

            if result.is_success() {
                if let Some(path) = artifact {
                    if tokio::fs::try_exists(path).await.unwrap_or(false) {
                        result.artifact = Some(path.to_path_buf());
                    } else {
                        result.status = StepStatus::Failed;
                        result.stderr = format!("no output artifact at {}", path.display());
                    }
                }
            }
            if result.status == StepStatus::Timeout {
                self.metrics.increment_timeouts(1);
            }

            if classify_step_result(&result) == RetryDisposition::Stop {
                return Ok(result);
            }
            if attempt >= policy.max_attempts {
                warn!(%stage, attempts = attempt, detail = %result.detail(), "Stage failed, attempts exhausted");
                return Ok(result);
            }

            let delay = policy.delay_for(attempt - 1);
            warn!(
                %stage,
                attempt,
                status = %result.status,
                retry_in_ms = delay.as_millis() as u64,
                "Stage attempt failed"
            );
            self.metrics.increment_retries(1);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%stage, "Shutdown requested, not retrying");
                    return Ok(result);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn cancelled() -> FileStatus {
    FileStatus::Skipped {
        reason: SkipReason::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use engine_core::{error::RunnerError, runner::{ProcessStepRunner, StepProgram}};
    use model::core::identity::RecordIdentity;
    use std::sync::Mutex;

    /// Scripted runner: pops a status per call and records the arguments.
    struct Scripted {
        extract: Mutex<Vec<StepStatus>>,
        upload: Mutex<Vec<StepStatus>>,
        calls: Mutex<Vec<(Stage, Vec<String>)>>,
        write_artifact: bool,
        partial_on_failure: bool,
    }

    impl Scripted {
        fn new(extract: Vec<StepStatus>, upload: Vec<StepStatus>) -> Self {
            Self {
                extract: Mutex::new(extract),
                upload: Mutex::new(upload),
                calls: Mutex::new(Vec::new()),
                write_artifact: true,
                partial_on_failure: false,
            }
        }

        fn calls(&self, stage: Stage) -> usize {
            self.calls.lock().unwrap().iter().filter(|(s, _)| *s == stage).count()
        }
    }

    #[async_trait]
    impl StepRunner for Scripted {
        async fn run(&self, stage: Stage, args: &[String], _: Duration) -> Result<StepResult, RunnerError> {
            self.calls.lock().unwrap().push((stage, args.to_vec()));
            let queue = match stage {
                Stage::Extract => &self.extract,
                Stage::Upload => &self.upload,
            };
            let status = {
                let mut q = queue.lock().unwrap();
                if q.len() > 1 { q.remove(0) } else { q[0] }
            };
            if stage == Stage::Extract && status == StepStatus::Success && self.write_artifact {
                // args: <input> --output <record>
                std::fs::write(&args[2], "{}").unwrap();
            }
            if stage == Stage::Extract && status == StepStatus::Failed && self.partial_on_failure {
                std::fs::write(&args[2], "{partial").unwrap();
            }
            Ok(StepResult::new(stage, status))
        }
    }

    fn config(output_dir: &Path, attempts: usize) -> ExecutorConfig {
        ExecutorConfig {
            output_dir: output_dir.to_path_buf(),
            extract_args: ArgTemplate::parse("{input} --output {output}"),
            upload_args: ArgTemplate::parse("{record} {action} {record_id}"),
            extract_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(5),
            policy: RetryPolicy::new(attempts, Duration::from_millis(100), Duration::from_secs(1)),
        }
    }

    fn decision(action: Action) -> Decision {
        Decision::new(
            "/w/2025-01-05.jpg",
            Utc::now(),
            RecordIdentity::from_ymd(2025, 1, 5),
            action,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn runs_extract_then_upload() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Scripted::new(vec![StepStatus::Success], vec![StepStatus::Success]));
        let metrics = Metrics::new();
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 3), metrics.clone());

        let outcome = executor
            .execute(
                &decision(Action::Update {
                    existing_id: Some("page-5".into()),
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, FileStatus::Succeeded);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].artifact, Some(dir.path().join("2025-01-05.jpg.json")));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].1, vec![
            dir.path().join("2025-01-05.jpg.json").display().to_string(),
            "update".to_string(),
            "page-5".to_string(),
        ]);
        assert_eq!(metrics.snapshot().uploads_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_timeouts_exhaust_retries() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Scripted::new(vec![StepStatus::Success], vec![StepStatus::Timeout]));
        let metrics = Metrics::new();
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 3), metrics.clone());

        let outcome = executor
            .execute(&decision(Action::Create), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome.status,
            FileStatus::Failed {
                stage: Some(Stage::Upload),
                ..
            }
        ));
        assert_eq!(runner.calls(Stage::Extract), 1);
        assert_eq!(runner.calls(Stage::Upload), 3);
        assert_eq!(outcome.steps[1].attempts, 3);
        let snap = metrics.snapshot();
        assert_eq!(snap.timeout_count, 3);
        assert_eq!(snap.retry_count, 2);
        assert_eq!(snap.uploads_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn extract_recovers_after_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Scripted::new(
            vec![StepStatus::Failed, StepStatus::Success],
            vec![StepStatus::Success],
        ));
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 3), Metrics::new());

        let outcome = executor
            .execute(&decision(Action::Create), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, FileStatus::Succeeded);
        assert_eq!(outcome.steps[0].attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_artifact_fails_extract_and_skips_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripted = Scripted::new(vec![StepStatus::Success], vec![StepStatus::Success]);
        scripted.write_artifact = false;
        let runner = Arc::new(scripted);
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 2), Metrics::new());

        let outcome = executor
            .execute(&decision(Action::Create), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome.status,
            FileStatus::Failed { stage: Some(Stage::Extract), ref detail } if detail.contains("no output artifact")
        ));
        assert_eq!(runner.calls(Stage::Upload), 0);
    }

    #[tokio::test]
    async fn stale_artifact_is_removed_before_extract() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("2025-01-05.jpg.json");
        std::fs::write(&stale, "old").unwrap();

        let mut scripted = Scripted::new(vec![StepStatus::Success], vec![StepStatus::Success]);
        scripted.write_artifact = false;
        let executor = PipelineExecutor::new(Arc::new(scripted), config(dir.path(), 1), Metrics::new());

        let outcome = executor
            .execute(&decision(Action::Create), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_failed());
        assert!(!stale.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_record_from_failed_attempt_is_not_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripted = Scripted::new(
            vec![StepStatus::Failed, StepStatus::Success],
            vec![StepStatus::Success],
        );
        scripted.write_artifact = false;
        scripted.partial_on_failure = true;
        let runner = Arc::new(scripted);
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 2), Metrics::new());

        let outcome = executor
            .execute(&decision(Action::Create), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome.status,
            FileStatus::Failed { stage: Some(Stage::Extract), ref detail } if detail.contains("no output artifact")
        ));
        assert_eq!(outcome.steps[0].attempts, 2);
        assert_eq!(runner.calls(Stage::Upload), 0);
        assert!(!dir.path().join("2025-01-05.jpg.json").exists());
    }

    #[tokio::test]
    async fn upload_receives_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Scripted::new(vec![StepStatus::Success], vec![StepStatus::Success]));
        let mut cfg = config(dir.path(), 1);
        cfg.upload_args = ArgTemplate::parse("{record} --hash {content_hash}");
        let executor = PipelineExecutor::new(runner.clone(), cfg, Metrics::new());

        let decision = decision(Action::Create).with_fingerprint(Some("9f2c".into()));
        executor.execute(&decision, &CancellationToken::new()).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].1[1..], ["--hash".to_string(), "9f2c".to_string()]);
    }

    #[tokio::test]
    async fn skip_and_error_never_invoke_the_runner() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Scripted::new(vec![StepStatus::Success], vec![StepStatus::Success]));
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 3), Metrics::new());
        let cancel = CancellationToken::new();

        let skipped = executor
            .execute(
                &decision(Action::Skip {
                    reason: SkipReason::SupersededInBatch,
                }),
                &cancel,
            )
            .await
            .unwrap();
        let errored = executor
            .execute(
                &decision(Action::Error {
                    message: "No date found".into(),
                }),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(
            skipped.status,
            FileStatus::Skipped {
                reason: SkipReason::SupersededInBatch
            }
        );
        assert_eq!(
            errored.status,
            FileStatus::Failed {
                stage: None,
                detail: "No date found".into()
            }
        );
        assert_eq!(runner.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Scripted::new(vec![StepStatus::Success], vec![StepStatus::Success]));
        let executor = PipelineExecutor::new(runner.clone(), config(dir.path(), 3), Metrics::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = executor.execute(&decision(Action::Create), &cancel).await.unwrap();
        assert_eq!(outcome.status, cancelled());
        assert_eq!(runner.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_program_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessStepRunner::new()
            .with_program(Stage::Extract, StepProgram::new("/nonexistent/digitizer"))
            .with_program(Stage::Upload, StepProgram::new("/nonexistent/upload"));
        let executor = PipelineExecutor::new(Arc::new(runner), config(dir.path(), 3), Metrics::new());

        let err = executor
            .execute(&decision(Action::Create), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Runner(RunnerError::ProgramNotFound { .. })));
    }
}
