use crate::error::RunnerError;
use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::process::Command;
use tracing::debug;

/// Captured output beyond this many bytes is truncated from the front.
const OUTPUT_TAIL_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs `spec` to completion or until `timeout`, whichever comes first.
///
/// On expiry the child is killed and `timed_out` is set. Non-zero exits are
/// reported in the output, not as errors.
pub async fn run_command(spec: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|source| match source.kind() {
        ErrorKind::NotFound => RunnerError::ProgramNotFound {
            program: spec.program.clone(),
        },
        _ => RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        },
    })?;

    let started = Instant::now();
    debug!(program = %spec.program, args = ?spec.args, "Spawned external program");

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: tail(&output.stdout),
            stderr: tail(&output.stderr),
            timed_out: false,
            duration: started.elapsed(),
        }),
        Ok(Err(source)) => Err(RunnerError::Io {
            program: spec.program.clone(),
            source,
        }),
        // Dropping the wait future drops the child, which kills it.
        Err(_) => Ok(ProcessOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            duration: started.elapsed(),
        }),
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(OUTPUT_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Locates `program` the way a shell would: as a path when it contains a
/// separator, otherwise through `PATH`.
pub fn resolve_program(program: &str, working_dir: Option<&Path>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let full = match (candidate.is_relative(), working_dir) {
            (true, Some(dir)) => dir.join(candidate),
            _ => candidate.to_path_buf(),
        };
        return full.is_file().then_some(full);
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|p| p.is_file())
    })
}
