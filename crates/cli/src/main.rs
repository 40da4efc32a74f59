use crate::{
    error::CliError,
    shutdown::{ExitCode, SignalGuard},
};
use clap::Parser;
use commands::Commands;
use engine_config::{
    env::EnvManager,
    settings::{KNOWN_KEYS, Settings},
};
use engine_processing::artifacts;
use engine_runtime::{factory, orchestrator::BatchOutcome};
use futures_util::StreamExt;
use std::{path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod check;
mod commands;
mod error;
mod output;
mod shutdown;

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Parser)]
#[command(name = "scanflow", version = "0.1.0", about = "Scanned planner page pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Env file to load on top of the process environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Overrides WATCH_FOLDER
    #[arg(long, global = true)]
    watch_dir: Option<PathBuf>,

    /// Overrides PAUSE_SECONDS
    #[arg(long, global = true)]
    idle_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code.into(),
        Err(e) => {
            error!(error = %e, "scanflow failed");
            eprintln!("error: {e}");
            e.exit_code().into()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let env = load_env(&cli)?;
    init_logging(env.get("LOG_LEVEL").unwrap_or("info"));
    let settings = Settings::from_env(&env)?;

    match cli.command {
        Commands::Run => watch(&settings).await,
        Commands::Scan => scan(&settings).await,
        Commands::Gaps => {
            let orchestrator = factory::create_orchestrator(&settings, CancellationToken::new())?;
            let report = orchestrator.check_gaps().await?;
            output::print_json(&report)?;
            Ok(ExitCode::Success)
        }
        Commands::Batches => print_batches(&settings).await,
        Commands::Check => {
            let checks = check::check_environment(&settings);
            output::print_json(&checks)?;
            let failed: Vec<String> = checks
                .into_iter()
                .filter(|c| !c.passed)
                .map(|c| format!("{}: {}", c.name, c.detail))
                .collect();
            if failed.is_empty() {
                Ok(ExitCode::Success)
            } else {
                Err(CliError::EnvironmentCheck(failed))
            }
        }
        Commands::Config => {
            let view = serde_json::json!({
                "settings": settings,
                "environment": env.masked_view(KNOWN_KEYS.iter().copied()),
            });
            output::print_json(&view)?;
            Ok(ExitCode::Success)
        }
        Commands::Stats => print_stats(&settings).await,
        Commands::Cleanup { days } => cleanup(&settings, days).await,
    }
}

/// Process environment, then the env file, then command-line overrides.
fn load_env(cli: &Cli) -> Result<EnvManager, CliError> {
    let mut env = EnvManager::new();
    match &cli.env_file {
        Some(path) => env.load_from_file(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_ENV_FILE);
            if default.is_file() {
                env.load_from_file(default)?;
            }
        }
    }
    if let Some(dir) = &cli.watch_dir {
        env.set("WATCH_FOLDER", dir.display().to_string());
    }
    if let Some(secs) = cli.idle_secs {
        env.set("PAUSE_SECONDS", secs.to_string());
    }
    Ok(env)
}

/// `RUST_LOG` wins over `LOG_LEVEL`. Logs go to stderr so stdout stays JSON.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn watch(settings: &Settings) -> Result<ExitCode, CliError> {
    settings.validate()?;
    let signals = SignalGuard::install(CancellationToken::new())?;

    let orchestrator = factory::create_orchestrator(settings, signals.token())?;
    let trigger = factory::create_trigger(settings)?;
    orchestrator.run(trigger).await?;

    if let Some(signal) = signals.received() {
        info!(signal = signal.name(), "Shutdown complete");
    }
    Ok(ExitCode::Success)
}

async fn scan(settings: &Settings) -> Result<ExitCode, CliError> {
    settings.validate()?;
    let Some(batch) = factory::scan_batch(settings) else {
        warn!(folder = %settings.watch.folder.display(), "No eligible files to process");
        return Ok(ExitCode::Success);
    };

    let signals = SignalGuard::install(CancellationToken::new())?;
    let orchestrator = factory::create_orchestrator(settings, signals.token())?;

    match orchestrator.run_once(batch).await? {
        BatchOutcome::Completed(summary) => {
            output::print_json(&summary)?;
            Ok(ExitCode::Success)
        }
        BatchOutcome::Deferred { reason } => Err(CliError::Deferred(reason)),
        BatchOutcome::Stopped { summary } => {
            if let Some(summary) = &summary {
                output::print_json(summary)?;
            }
            let signal = signals.received();
            warn!(signal = signal.map(|s| s.name()), "Scan stopped before the batch finished");
            Ok(signal.map_or(ExitCode::Interrupted, |s| s.exit_code()))
        }
    }
}

async fn print_batches(settings: &Settings) -> Result<ExitCode, CliError> {
    let signals = SignalGuard::install(CancellationToken::new())?;
    let cancel = signals.token();

    let batches = factory::create_trigger(settings)?.observe();
    futures_util::pin_mut!(batches);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(ExitCode::Success),
            next = batches.next() => next,
        };
        match next {
            Some(Ok(batch)) => output::print_batch(&batch)?,
            Some(Err(e)) => return Err(CliError::Orchestrator(e.into())),
            None => return Ok(ExitCode::Success),
        }
    }
}

async fn print_stats(settings: &Settings) -> Result<ExitCode, CliError> {
    let pending = factory::scan_batch(settings).map_or(0, |batch| batch.len());
    let outputs = artifacts::output_stats(&settings.watch.output_dir).await?;
    let view = serde_json::json!({
        "watch_folder": settings.watch.folder,
        "pending_files": pending,
        "outputs": outputs,
    });
    output::print_json(&view)?;
    Ok(ExitCode::Success)
}

async fn cleanup(settings: &Settings, days: Option<u64>) -> Result<ExitCode, CliError> {
    let retention = match days {
        Some(days) => Some(Duration::from_secs(days.saturating_mul(24 * 60 * 60))).filter(|d| !d.is_zero()),
        None => settings.housekeeping.retention(),
    };
    let Some(max_age) = retention else {
        warn!("Output retention is disabled, nothing to clean up");
        return Ok(ExitCode::Success);
    };

    let removed = artifacts::sweep_expired(&settings.watch.output_dir, max_age).await?;
    output::print_json(&serde_json::json!({
        "output_dir": settings.watch.output_dir,
        "removed": removed,
    }))?;
    Ok(ExitCode::Success)
}
