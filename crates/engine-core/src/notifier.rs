use crate::{
    error::NotifyError,
    retry::{RetryDisposition, RetryPolicy},
};
use async_trait::async_trait;
use model::events::{Event, NotificationEvent};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// Delivers structured events. Callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes events to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        match event {
            NotificationEvent::BatchCompleted(summary) => info!(
                event = event.event_type(),
                batch_id = %summary.batch_id,
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                gaps = summary.gaps.len(),
                elapsed_ms = ?summary.elapsed_ms(),
                "Batch completed"
            ),
            NotificationEvent::FileFailed {
                file,
                stage,
                detail,
            } => warn!(
                event = event.event_type(),
                file = %file.display(),
                stage = ?stage,
                detail = %detail,
                "File failed"
            ),
            NotificationEvent::GapReport { missing, spans } => {
                let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
                warn!(
                    event = event.event_type(),
                    count = missing.len(),
                    spans = spans.len(),
                    missing = %missing.join(", "),
                    "Date gaps detected"
                )
            }
            NotificationEvent::FatalError { kind, detail } => error!(
                event = event.event_type(),
                kind = ?kind,
                detail = %detail,
                "Fatal error"
            ),
            NotificationEvent::Reminder(stats) => info!(
                event = event.event_type(),
                uptime = %stats.uptime_display(),
                watch_folder = %stats.watch_folder.display(),
                records = stats.outputs.records,
                batches = stats.metrics.batches_processed,
                uploads = stats.metrics.uploads_completed,
                failures = stats.metrics.failure_count,
                "Reminder: scan this week's planner pages"
            ),
        }
        Ok(())
    }
}

/// POSTs each event as JSON (`{"event": ..., "payload": ...}`) to a URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            policy: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2)),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn post(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let resp = self.client.post(&self.url).json(event).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(resp.status().as_u16()))
        }
    }
}

fn classify(err: &NotifyError) -> RetryDisposition {
    match err {
        NotifyError::Status(code) if *code >= 500 => RetryDisposition::Retry,
        NotifyError::Http(e) if e.is_connect() || e.is_timeout() => RetryDisposition::Retry,
        _ => RetryDisposition::Stop,
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.policy
            .run(
                |attempt| {
                    if attempt > 0 {
                        info!(attempt, event = event.event_type(), "Resending webhook notification");
                    }
                    self.post(event)
                },
                classify,
            )
            .await
            .map_err(|e| e.into_inner())
    }
}

/// Sends every event to all sinks, even when some of them fail.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Notifier>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut failed = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                warn!(event = event.event_type(), error = %e, "Notification sink failed");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(NotifyError::Partial {
                failed,
                total: self.sinks.len(),
            });
        }
        Ok(())
    }
}
