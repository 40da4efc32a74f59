//! Run loop: watches for batches and drives each through resolve, execute
//! and report.

use crate::error::OrchestratorError;
use chrono::Utc;
use engine_core::{metrics::Metrics, notifier::Notifier};
use engine_processing::{
    error::ResolveError,
    executor::PipelineExecutor,
    resolver::{Resolver, detect_gaps, group_spans, inferred_range},
    trigger::BatchTrigger,
};
use futures::{StreamExt, stream};
use model::{
    core::{
        identifiers::RunId,
        identity::{IdentityRange, RecordIdentity},
    },
    events::{Event, GapSpan, NotificationEvent},
    execution::{ledger::LedgerState, stats::ProcessingStats, summary::RunSummary},
    records::batch::Batch,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod housekeeping;
pub mod state;

pub use housekeeping::Housekeeping;
pub use state::OrchestratorState;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on files executing at once.
    pub max_concurrency: usize,
    /// Fixed range for gap detection; inferred from the ledger when unset.
    pub gap_range: Option<IdentityRange>,
    pub gap_lookback_days: u64,
    pub watch_folder: PathBuf,
    /// Period of the reminder notification. No reminders when unset.
    pub reminder_interval: Option<Duration>,
    /// Records older than this are removed from the outputs folder.
    pub output_retention: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            gap_range: None,
            gap_lookback_days: 30,
            watch_folder: PathBuf::new(),
            reminder_interval: None,
            output_retention: None,
        }
    }
}

/// How a batch left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed(RunSummary),
    /// The ledger could not be read. The batch goes back to the trigger.
    Deferred { reason: String },
    /// A stop request arrived before the batch finished. `summary` holds the
    /// files that were worked on when execution had already started.
    Stopped { summary: Option<RunSummary> },
}

/// Result of a standalone gap check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapReport {
    pub range: Option<IdentityRange>,
    pub missing: Vec<RecordIdentity>,
    pub spans: Vec<GapSpan>,
}

/// Observes the run loop from outside and asks it to stop.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    state: watch::Receiver<OrchestratorState>,
    cancel: CancellationToken,
}

impl OrchestratorHandle {
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Requests a graceful stop. In-flight stages run to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves once `target` is reached, or with `false` if the loop
    /// stopped first.
    pub async fn wait_for(&mut self, target: OrchestratorState) -> bool {
        self.state
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map(|s| *s == target)
            .unwrap_or(false)
    }
}

pub struct Orchestrator {
    resolver: Resolver,
    executor: PipelineExecutor,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    housekeeping: Housekeeping,
    config: OrchestratorConfig,
    state: watch::Sender<OrchestratorState>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        resolver: Resolver,
        executor: PipelineExecutor,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        let housekeeping = Housekeeping::new(
            notifier.clone(),
            metrics.clone(),
            config.watch_folder.clone(),
            executor.config().output_dir.clone(),
        )
        .with_reminders(config.reminder_interval)
        .with_retention(config.output_retention);
        Self {
            resolver,
            executor,
            notifier,
            metrics,
            housekeeping,
            config,
            state,
            cancel,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            state: self.state.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn housekeeping(&self) -> &Housekeeping {
        &self.housekeeping
    }

    pub async fn processing_stats(&self) -> ProcessingStats {
        self.housekeeping.stats().await
    }

    /// Processes batches until a stop is requested or a fatal error occurs.
    ///
    /// Fatal errors are announced to the notifier before being returned.
    pub async fn run(&self, mut trigger: BatchTrigger) -> Result<(), OrchestratorError> {
        info!(root = %trigger.root().display(), "Orchestrator started");
        self.transition(OrchestratorState::Watching)?;
        let chores_cancel = self.cancel.child_token();
        let chores = self.housekeeping.clone().spawn(chores_cancel.clone());

        let result = self.run_loop(&mut trigger).await;
        if let Err(e) = &result {
            self.announce_fatal(e).await;
        }
        chores_cancel.cancel();
        if let Some(task) = chores {
            if let Err(e) = task.await {
                warn!(error = %e, "Housekeeping task ended abnormally");
            }
        }
        if trigger.pending_len() > 0 {
            warn!(pending = trigger.pending_len(), "Stopping with unprocessed files");
        }
        self.shut_down();
        result
    }

    /// Processes a single batch outside the watch loop, then stops.
    pub async fn run_once(&self, batch: Batch) -> Result<BatchOutcome, OrchestratorError> {
        self.transition(OrchestratorState::Watching)?;
        self.transition(OrchestratorState::BatchReady)?;
        let result = self.process_batch(&batch).await;
        if let Err(e) = &result {
            self.announce_fatal(e).await;
        }
        self.shut_down();
        result
    }

    async fn run_loop(&self, trigger: &mut BatchTrigger) -> Result<(), OrchestratorError> {
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Stop requested while watching");
                    return Ok(());
                }
                next = trigger.next_batch() => next?,
            };

            self.transition(OrchestratorState::BatchReady)?;
            match self.process_batch(&batch).await? {
                BatchOutcome::Completed(_) => {}
                BatchOutcome::Deferred { reason } => {
                    info!(batch_id = %batch.id(), files = batch.len(), %reason, "Batch deferred");
                    trigger.defer(batch);
                }
                BatchOutcome::Stopped { summary } => {
                    if summary.is_none() {
                        trigger.defer(batch);
                    }
                    return Ok(());
                }
            }

            if self.cancel.is_cancelled() {
                info!("Stop requested, not accepting further batches");
                return Ok(());
            }
            self.transition(OrchestratorState::Watching)?;
        }
    }

    /// Resolves, executes and reports one batch that is in `BatchReady`.
    ///
    /// Leaves the state in `Reporting` when the batch completed, in
    /// `Resolving` when it was deferred and in `Stopping` when a stop request
    /// was seen at a state boundary. No external call starts after that.
    pub async fn process_batch(&self, batch: &Batch) -> Result<BatchOutcome, OrchestratorError> {
        if self.stop_requested()? {
            return Ok(BatchOutcome::Stopped { summary: None });
        }
        self.transition(OrchestratorState::Resolving)?;
        let run_id = RunId::generate();
        let started_at = Utc::now();
        info!(run_id = %run_id, batch_id = %batch.id(), files = batch.len(), "Processing batch");

        let snapshot = match self.resolver.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) if !e.is_fatal() => {
                warn!(run_id = %run_id, error = %e, "Ledger unavailable");
                return Ok(BatchOutcome::Deferred { reason: e.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        if self.stop_requested()? {
            return Ok(BatchOutcome::Stopped { summary: None });
        }
        let decisions = match self.resolver.resolve(batch, &snapshot, &self.cancel).await {
            Ok(decisions) => decisions,
            Err(ResolveError::Cancelled) => {
                self.stop_requested()?;
                return Ok(BatchOutcome::Stopped { summary: None });
            }
            Err(e) => return Err(e.into()),
        };
        if self.stop_requested()? {
            return Ok(BatchOutcome::Stopped { summary: None });
        }

        self.transition(OrchestratorState::Executing)?;
        let mut summary = RunSummary::new(run_id, batch.id().clone(), started_at);
        let mut uploaded = Vec::new();
        let limit = self.config.max_concurrency.min(decisions.len()).max(1);
        debug!(workers = limit, "Executing decisions");

        let work: Vec<_> = decisions
            .iter()
            .map(|decision| self.executor.execute(decision, &self.cancel))
            .collect();
        let mut outcomes = stream::iter(work).buffer_unordered(limit);
        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            uploaded.extend(outcome.uploaded_identity());
            summary.record(&outcome);
        }
        drop(outcomes);

        if self.stop_requested()? {
            summary.finish(Vec::new(), Utc::now());
            self.report_interrupted(&summary).await;
            return Ok(BatchOutcome::Stopped { summary: Some(summary) });
        }
        self.transition(OrchestratorState::Reporting)?;
        let known = snapshot.merged_with(uploaded);
        let report = self.gaps_for(&known);
        summary.finish(report.missing.clone(), Utc::now());
        self.metrics.increment_batches(1);
        self.report(&summary, report).await;

        Ok(BatchOutcome::Completed(summary))
    }

    /// Reads the ledger and reports missing identities without processing
    /// anything.
    pub async fn check_gaps(&self) -> Result<GapReport, OrchestratorError> {
        let snapshot = self.resolver.snapshot().await?;
        Ok(self.gaps_for(&snapshot))
    }

    fn gaps_for(&self, known: &LedgerState) -> GapReport {
        let range = self
            .config
            .gap_range
            .or_else(|| inferred_range(known, self.config.gap_lookback_days));
        let missing = detect_gaps(known, range);
        let spans = group_spans(&missing);
        GapReport { range, missing, spans }
    }

    async fn report(&self, summary: &RunSummary, gaps: GapReport) {
        info!(
            run_id = %summary.run_id,
            batch_id = %summary.batch_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            created = summary.created,
            updated = summary.updated,
            gaps = summary.gaps.len(),
            elapsed_ms = summary.elapsed_ms().unwrap_or_default(),
            "Run finished"
        );
        info!(metrics = ?self.metrics.snapshot(), "Pipeline metrics");

        for failure in &summary.failures {
            self.notify(NotificationEvent::FileFailed {
                file: failure.file.clone(),
                stage: failure.stage,
                detail: failure.detail.clone(),
            })
            .await;
        }
        self.notify(NotificationEvent::BatchCompleted(summary.clone())).await;

        if !gaps.missing.is_empty() {
            warn!(missing = gaps.missing.len(), spans = gaps.spans.len(), "Date gaps detected");
            self.notify(NotificationEvent::GapReport {
                missing: gaps.missing,
                spans: gaps.spans,
            })
            .await;
        }
    }

    /// Partial runs only announce their failures; there is no completion
    /// report or gap check for them.
    async fn report_interrupted(&self, summary: &RunSummary) {
        info!(
            run_id = %summary.run_id,
            batch_id = %summary.batch_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run interrupted"
        );
        for failure in &summary.failures {
            self.notify(NotificationEvent::FileFailed {
                file: failure.file.clone(),
                stage: failure.stage,
                detail: failure.detail.clone(),
            })
            .await;
        }
    }

    /// Moves to `Stopping` when a stop was requested. Called at every state
    /// boundary of a batch.
    fn stop_requested(&self) -> Result<bool, OrchestratorError> {
        if !self.cancel.is_cancelled() {
            return Ok(false);
        }
        let current = self.state();
        if current != OrchestratorState::Stopping {
            info!(state = %current, "Stop requested, abandoning the rest of the batch");
            self.transition(OrchestratorState::Stopping)?;
        }
        Ok(true)
    }

    async fn announce_fatal(&self, e: &OrchestratorError) {
        error!(error = %e, "Orchestrator halted");
        self.notify(NotificationEvent::FatalError {
            kind: e.fatal_kind(),
            detail: e.to_string(),
        })
        .await;
    }

    async fn notify(&self, event: NotificationEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(event = event.event_type(), error = %e, "Notification delivery failed");
        }
    }

    fn transition(&self, next: OrchestratorState) -> Result<(), OrchestratorError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %current, to = %next, "State transition");
        self.state.send_replace(next);
        Ok(())
    }

    fn shut_down(&self) {
        let current = self.state();
        if current.is_terminal() {
            return;
        }
        if current != OrchestratorState::Stopping {
            debug!(from = %current, to = %OrchestratorState::Stopping, "State transition");
            self.state.send_replace(OrchestratorState::Stopping);
        }
        self.state.send_replace(OrchestratorState::Stopped);
        info!(metrics = ?self.metrics.snapshot(), "Orchestrator stopped");
    }
}
