use engine_core::{error::RunnerError, retry::RetryDisposition};
use model::execution::step::{StepResult, StepStatus};

pub fn classify_step_result(result: &StepResult) -> RetryDisposition {
    match result.status {
        StepStatus::Success => RetryDisposition::Stop,
        StepStatus::Failed | StepStatus::Timeout => RetryDisposition::Retry,
    }
}

pub fn classify_runner_error(err: &RunnerError) -> RetryDisposition {
    if err.is_fatal() {
        RetryDisposition::Stop
    } else {
        RetryDisposition::Retry
    }
}
