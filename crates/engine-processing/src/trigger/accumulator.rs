use chrono::{DateTime, Utc};
use model::records::{
    batch::{Batch, BatchEntry},
    watch::{WatchEvent, extension_of},
};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};
use tracing::trace;

/// Decides which paths may enter a batch.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    extensions: HashSet<String>,
}

impl EligibilityFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn accepts_name(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Recognised extension and a regular, non-empty file on disk.
    pub fn accepts(&self, path: &Path) -> bool {
        self.accepts_name(path)
            && std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
    }
}

/// Debounce map of paths seen since the last batch closed.
#[derive(Debug, Clone)]
pub struct PendingSet {
    filter: EligibilityFilter,
    pending: HashMap<PathBuf, DateTime<Utc>>,
    events_received: u64,
    events_debounced: u64,
}

impl PendingSet {
    pub fn new(filter: EligibilityFilter) -> Self {
        Self {
            filter,
            pending: HashMap::new(),
            events_received: 0,
            events_debounced: 0,
        }
    }

    /// Records an event. Returns `false` when it was ignored as ineligible.
    pub fn observe(&mut self, event: WatchEvent) -> bool {
        self.events_received += 1;
        if !self.filter.accepts(&event.path) {
            trace!(path = %event.path.display(), "Ignoring ineligible event");
            return false;
        }

        match self.pending.get_mut(&event.path) {
            Some(ts) => {
                self.events_debounced += 1;
                if event.timestamp > *ts {
                    *ts = event.timestamp;
                }
            }
            None => {
                self.pending.insert(event.path, event.timestamp);
            }
        }
        true
    }

    /// Closes the pending set into a batch. Paths that vanished or became
    /// ineligible since they were observed are dropped.
    pub fn drain(&mut self, closed_at: DateTime<Utc>) -> Option<Batch> {
        let entries: Vec<BatchEntry> = self
            .pending
            .drain()
            .filter(|(path, _)| self.filter.accepts(path))
            .map(|(path, ts)| BatchEntry::new(path, ts))
            .collect();

        (!entries.is_empty()).then(|| Batch::new(entries, closed_at))
    }

    /// Puts a deferred batch back, keeping any newer observations.
    pub fn restore(&mut self, batch: Batch) {
        for entry in batch.into_entries() {
            let ts = self.pending.entry(entry.path).or_insert(entry.timestamp);
            if entry.timestamp > *ts {
                *ts = entry.timestamp;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn events_received(&self) -> u64 {
        self.events_received
    }

    pub fn events_debounced(&self) -> u64 {
        self.events_debounced
    }
}
