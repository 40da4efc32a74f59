use crate::core::identity::RecordIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Remote metadata known for one record identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identity: RecordIdentity,
    pub record_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
}

impl LedgerEntry {
    pub fn new(identity: RecordIdentity) -> Self {
        Self {
            identity,
            record_id: None,
            last_modified: None,
            content_hash: None,
        }
    }

    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    pub fn with_last_modified(mut self, ts: DateTime<Utc>) -> Self {
        self.last_modified = Some(ts);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// Read-only snapshot of the remote ledger, refreshed once per batch.
///
/// Never mutated by the engine; [`LedgerState::merged_with`] returns a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    entries: BTreeMap<RecordIdentity, LedgerEntry>,
    fetched_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    pub fn new(entries: impl IntoIterator<Item = LedgerEntry>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.identity, e)).collect(),
            fetched_at: Some(fetched_at),
        }
    }

    pub fn get(&self, identity: &RecordIdentity) -> Option<&LedgerEntry> {
        self.entries.get(identity)
    }

    pub fn contains(&self, identity: &RecordIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn identities(&self) -> BTreeSet<RecordIdentity> {
        self.entries.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn first(&self) -> Option<RecordIdentity> {
        self.entries.keys().next().copied()
    }

    pub fn last(&self) -> Option<RecordIdentity> {
        self.entries.keys().next_back().copied()
    }

    /// A copy of this snapshot that also knows `identities`, e.g. the ones
    /// uploaded during the current run. Existing entries are kept as they are.
    pub fn merged_with(&self, identities: impl IntoIterator<Item = RecordIdentity>) -> Self {
        let mut next = self.clone();
        for identity in identities {
            next.entries
                .entry(identity)
                .or_insert_with(|| LedgerEntry::new(identity));
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> RecordIdentity {
        RecordIdentity::from_ymd(2025, 1, d).unwrap()
    }

    #[test]
    fn merged_with_leaves_snapshot_untouched() {
        let snapshot = LedgerState::new(
            [LedgerEntry::new(day(1)).with_record_id("page-1")],
            Utc::now(),
        );
        let merged = snapshot.merged_with([day(1), day(2)]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.get(&day(1)).unwrap().record_id.as_deref(),
            Some("page-1")
        );
    }

    #[test]
    fn first_and_last_follow_identity_order() {
        let state = LedgerState::new(
            [day(5), day(1), day(3)].into_iter().map(LedgerEntry::new),
            Utc::now(),
        );
        assert_eq!(state.first(), Some(day(1)));
        assert_eq!(state.last(), Some(day(5)));
    }
}
