//! Background chores of the watch loop: the periodic reminder and the
//! retention sweep over the outputs folder.

use engine_core::{metrics::Metrics, notifier::Notifier};
use engine_processing::artifacts;
use model::{
    events::{Event, NotificationEvent},
    execution::stats::{OutputStats, ProcessingStats},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct Housekeeping {
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    watch_folder: PathBuf,
    output_dir: PathBuf,
    started: Instant,
    reminder_interval: Option<Duration>,
    retention: Option<Duration>,
}

impl Housekeeping {
    pub fn new(notifier: Arc<dyn Notifier>, metrics: Metrics, watch_folder: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            notifier,
            metrics,
            watch_folder,
            output_dir,
            started: Instant::now(),
            reminder_interval: None,
            retention: None,
        }
    }

    pub fn with_reminders(mut self, every: Option<Duration>) -> Self {
        self.reminder_interval = every.filter(|d| !d.is_zero());
        self
    }

    pub fn with_retention(mut self, max_age: Option<Duration>) -> Self {
        self.retention = max_age.filter(|d| !d.is_zero());
        self
    }

    pub fn is_scheduled(&self) -> bool {
        self.reminder_interval.is_some() || self.retention.is_some()
    }

    /// Counters, uptime and the state of the outputs folder.
    pub async fn stats(&self) -> ProcessingStats {
        let outputs = match artifacts::output_stats(&self.output_dir).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(output_dir = %self.output_dir.display(), error = %e, "Could not read outputs folder");
                OutputStats {
                    output_dir: self.output_dir.clone(),
                    ..OutputStats::default()
                }
            }
        };
        ProcessingStats {
            collected_at: chrono::Utc::now(),
            uptime_secs: self.started.elapsed().as_secs(),
            watch_folder: self.watch_folder.clone(),
            outputs,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Removes records older than the retention window. Zero when retention
    /// is disabled.
    pub async fn sweep(&self) -> usize {
        let Some(max_age) = self.retention else {
            return 0;
        };
        match artifacts::sweep_expired(&self.output_dir, max_age).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(output_dir = %self.output_dir.display(), error = %e, "Retention sweep failed");
                0
            }
        }
    }

    pub async fn send_reminder(&self) {
        let event = NotificationEvent::Reminder(self.stats().await);
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(event = event.event_type(), error = %e, "Notification delivery failed");
        }
    }

    /// Runs the chores until `cancel` fires. `None` when nothing is scheduled.
    pub fn spawn(self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.is_scheduled() {
            return None;
        }
        Some(tokio::spawn(self.run(cancel)))
    }

    async fn run(self, cancel: CancellationToken) {
        // First reminder one full period after start; first sweep right away.
        let mut reminders = self.reminder_interval.map(|every| {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut sweeps = self.retention.map(|_| {
            let mut interval = tokio::time::interval(SWEEP_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        info!(
            reminder_secs = self.reminder_interval.map(|d| d.as_secs()),
            retention_days = self.retention.map(|d| d.as_secs() / 86_400),
            "Housekeeping started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick(&mut sweeps) => {
                    self.sweep().await;
                }
                _ = tick(&mut reminders) => {
                    info!("Sending reminder");
                    self.send_reminder().await;
                }
            }
        }
        debug!("Housekeeping stopped");
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
