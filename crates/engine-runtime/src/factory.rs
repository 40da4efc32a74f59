//! Builds the pipeline components from validated settings.

use crate::{
    error::OrchestratorError,
    orchestrator::{Orchestrator, OrchestratorConfig},
};
use chrono::Utc;
use engine_config::settings::{IdentitySource, Settings};
use engine_core::{
    ledger::{CommandLedgerClient, InMemoryLedger, LedgerClient},
    metrics::Metrics,
    notifier::{FanoutNotifier, LogNotifier, Notifier, WebhookNotifier},
    process::CommandSpec,
    retry::RetryPolicy,
    runner::{ProcessStepRunner, StepProgram, StepRunner},
};
use engine_processing::{
    args::{ArgTemplate, ArgVars},
    executor::{ExecutorConfig, PipelineExecutor},
    resolver::{
        Resolver,
        probe::{CommandProbe, FallbackProbe, FilenameProbe, IdentityProbe},
    },
    trigger::{
        BatchTrigger, EligibilityFilter,
        fs::{FsWatchSource, scan_existing},
    },
};
use model::{
    execution::step::Stage,
    records::batch::{Batch, BatchEntry},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn create_runner(settings: &Settings) -> Arc<dyn StepRunner> {
    let dir = settings.working_dir.clone();
    let runner = ProcessStepRunner::new()
        .with_program(
            Stage::Extract,
            StepProgram::new(&settings.extract.program).in_dir(dir.clone()),
        )
        .with_program(Stage::Upload, StepProgram::new(&settings.upload.program).in_dir(dir));
    Arc::new(runner)
}

pub fn create_probe(settings: &Settings, runner: Arc<dyn StepRunner>) -> Arc<dyn IdentityProbe> {
    let command = || -> Arc<dyn IdentityProbe> {
        Arc::new(CommandProbe::new(
            runner.clone(),
            ArgTemplate::parse(&settings.identity.args),
            settings.identity.timeout,
        ))
    };
    match settings.identity.source {
        IdentitySource::Filename => Arc::new(FilenameProbe),
        IdentitySource::Command => command(),
        IdentitySource::Auto => Arc::new(FallbackProbe::new(Arc::new(FilenameProbe), command())),
    }
}

/// Command-backed ledger when a query program is configured, otherwise an
/// empty in-memory ledger that treats every file as new.
pub fn create_ledger(settings: &Settings) -> Arc<dyn LedgerClient> {
    let Some(program) = settings.ledger.program.as_deref() else {
        info!("No ledger query program configured, starting from an empty ledger");
        return Arc::new(InMemoryLedger::empty());
    };
    let args = ArgTemplate::parse(&settings.ledger.args).render(&ArgVars::new());
    let command = CommandSpec::new(program, args).in_dir(settings.working_dir.clone());
    Arc::new(
        CommandLedgerClient::new(command, settings.ledger.timeout)
            .with_output_file(settings.ledger.output_file.clone()),
    )
}

/// Log sink always, webhook sink when a URL is configured.
pub fn create_notifier(settings: &Settings) -> Result<Arc<dyn Notifier>, OrchestratorError> {
    let sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    let mut fanout = FanoutNotifier::new(sinks);
    if let Some(url) = settings.notify.webhook_url.as_deref() {
        fanout.push(Arc::new(WebhookNotifier::new(url, settings.notify.timeout)?));
    }
    Ok(Arc::new(fanout))
}

pub fn retry_policy(settings: &Settings) -> RetryPolicy {
    RetryPolicy::new(
        settings.retry.attempts,
        settings.retry.base_delay,
        settings.retry.max_delay,
    )
}

pub fn executor_config(settings: &Settings) -> ExecutorConfig {
    ExecutorConfig {
        output_dir: settings.watch.output_dir.clone(),
        extract_args: ArgTemplate::parse(&settings.extract.args),
        upload_args: ArgTemplate::parse(&settings.upload.args),
        extract_timeout: settings.extract.timeout,
        upload_timeout: settings.upload.timeout,
        policy: retry_policy(settings),
    }
}

pub fn orchestrator_config(settings: &Settings) -> Result<OrchestratorConfig, OrchestratorError> {
    Ok(OrchestratorConfig {
        max_concurrency: settings.max_concurrency,
        gap_range: settings.gap_range()?,
        gap_lookback_days: settings.gaps.lookback_days,
        watch_folder: settings.watch.folder.clone(),
        reminder_interval: settings.housekeeping.reminders(),
        output_retention: settings.housekeeping.retention(),
    })
}

pub fn create_orchestrator(
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<Orchestrator, OrchestratorError> {
    let metrics = Metrics::new();
    let runner = create_runner(settings);
    let resolver = Resolver::new(create_probe(settings, runner.clone()), create_ledger(settings))
        .with_concurrency(settings.max_concurrency);
    let executor = PipelineExecutor::new(runner, executor_config(settings), metrics.clone());

    Ok(Orchestrator::new(
        resolver,
        executor,
        create_notifier(settings)?,
        metrics,
        orchestrator_config(settings)?,
        cancel,
    ))
}

pub fn eligibility_filter(settings: &Settings) -> EligibilityFilter {
    EligibilityFilter::new(&settings.watch.extensions)
}

/// Starts watching the folder and seeds the trigger with the newest files
/// already present.
pub fn create_trigger(settings: &Settings) -> Result<BatchTrigger, OrchestratorError> {
    let watch = &settings.watch;
    let (source, rx) = FsWatchSource::start(&watch.folder, watch.recursive, watch.queue_capacity)?;
    let filter = eligibility_filter(settings);
    let existing = scan_existing(&watch.folder, watch.recursive, &filter, watch.startup_scan_limit);
    if !existing.is_empty() {
        info!(files = existing.len(), "Queued existing files from startup scan");
    }

    let mut trigger = BatchTrigger::new(&watch.folder, watch.idle_window, filter, rx).with_source(source);
    trigger.seed(existing);
    Ok(trigger)
}

/// Every eligible file currently in the watch folder as one batch.
pub fn scan_batch(settings: &Settings) -> Option<Batch> {
    let watch = &settings.watch;
    let entries: Vec<BatchEntry> = scan_existing(
        &watch.folder,
        watch.recursive,
        &eligibility_filter(settings),
        usize::MAX,
    )
    .into_iter()
    .map(|event| BatchEntry::new(event.path, event.timestamp))
    .collect();

    if entries.is_empty() {
        None
    } else {
        Some(Batch::new(entries, Utc::now()))
    }
}
