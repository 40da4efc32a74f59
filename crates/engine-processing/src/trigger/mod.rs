//! Batch Trigger: turns bursts of watch events into quiescent batches.

use crate::error::TriggerError;
use accumulator::PendingSet;
use chrono::Utc;
use fs::{EventReceiver, FsWatchSource};
use futures::{Stream, stream};
use model::records::{batch::Batch, watch::WatchEvent};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

pub mod accumulator;
pub mod fs;

pub use accumulator::EligibilityFilter;

/// Closes a batch once no eligible event arrived for `idle_window` and at
/// least one file is pending.
#[derive(Debug)]
pub struct BatchTrigger {
    root: PathBuf,
    idle_window: Duration,
    pending: PendingSet,
    rx: EventReceiver,
    deadline: Option<Instant>,
    source: Option<FsWatchSource>,
}

impl BatchTrigger {
    pub fn new(root: impl Into<PathBuf>, idle_window: Duration, filter: EligibilityFilter, rx: EventReceiver) -> Self {
        Self {
            root: root.into(),
            idle_window,
            pending: PendingSet::new(filter),
            rx,
            deadline: None,
            source: None,
        }
    }

    /// Keeps the OS watch alive for as long as the trigger lives.
    pub fn with_source(mut self, source: FsWatchSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feeds events found outside the queue, e.g. by the startup scan.
    /// They still wait out the idle window.
    pub fn seed(&mut self, events: impl IntoIterator<Item = WatchEvent>) {
        let mut accepted = 0;
        for event in events {
            if self.pending.observe(event) {
                accepted += 1;
            }
        }
        if accepted > 0 {
            info!(files = accepted, "Seeded pending files");
            self.arm();
        }
    }

    /// Returns a batch to the pending set and restarts the idle window.
    pub fn defer(&mut self, batch: Batch) {
        info!(batch_id = %batch.id(), files = batch.len(), "Deferring batch to next trigger cycle");
        self.pending.restore(batch);
        self.arm();
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.idle_window);
    }

    /// Waits for the next settled batch.
    ///
    /// Cancel safe: pending files and the idle deadline survive a dropped call.
    pub async fn next_batch(&mut self) -> Result<Batch, TriggerError> {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(Ok(event)) => {
                        let path = event.path.clone();
                        if self.pending.observe(event) {
                            debug!(path = %path.display(), pending = self.pending.len(), "Observed file event");
                            self.deadline = Some(Instant::now() + self.idle_window);
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(TriggerError::ChannelClosed),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    if !self.root.is_dir() {
                        return Err(TriggerError::WatchFolderMissing(self.root.clone()));
                    }
                    if let Some(batch) = self.pending.drain(Utc::now()) {
                        info!(
                            batch_id = %batch.id(),
                            files = batch.len(),
                            events = self.pending.events_received(),
                            "Batch settled"
                        );
                        return Ok(batch);
                    }
                }
            }
        }
    }

    /// Lazy, infinite sequence of batches. Ends after yielding the first error.
    pub fn observe(self) -> impl Stream<Item = Result<Batch, TriggerError>> {
        stream::unfold(Some(self), |state| async move {
            let mut trigger = state?;
            match trigger.next_batch().await {
                Ok(batch) => Some((Ok(batch), Some(trigger))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
