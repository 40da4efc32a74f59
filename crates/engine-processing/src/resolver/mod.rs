//! Duplicate/Gap Resolver: per-file decisions against a ledger snapshot.

use crate::{artifacts, error::ResolveError};
use chrono::{DateTime, Utc};
use engine_core::ledger::LedgerClient;
use futures::{StreamExt, TryStreamExt, stream};
use model::{
    core::identity::RecordIdentity,
    execution::{
        decision::{Action, Decision, SkipReason},
        ledger::{LedgerEntry, LedgerState},
    },
    records::batch::{Batch, BatchEntry},
};
use probe::IdentityProbe;
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod gaps;
pub mod probe;

pub use gaps::{detect_gaps, group_spans, inferred_range};

pub struct Resolver {
    probe: Arc<dyn IdentityProbe>,
    ledger: Arc<dyn LedgerClient>,
    concurrency: usize,
}

impl Resolver {
    pub fn new(probe: Arc<dyn IdentityProbe>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            probe,
            ledger,
            concurrency: 1,
        }
    }

    /// How many files are probed at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fresh ledger snapshot for one batch.
    pub async fn snapshot(&self) -> Result<LedgerState, ResolveError> {
        Ok(self.ledger.fetch_state().await?)
    }

    /// One decision per batch entry, in batch order, with the supersede rule
    /// already applied.
    ///
    /// `cancel` is checked before each file and again before its identity is
    /// looked up. Once it fires no new lookup starts and the call returns
    /// [`ResolveError::Cancelled`].
    pub async fn resolve(
        &self,
        batch: &Batch,
        ledger: &LedgerState,
        cancel: &CancellationToken,
    ) -> Result<Vec<Decision>, ResolveError> {
        let pending: Vec<_> = batch
            .entries()
            .iter()
            .map(|entry| self.decide_entry(entry, ledger, cancel))
            .collect();
        let decisions: Vec<Decision> = stream::iter(pending).buffered(self.concurrency).try_collect().await?;

        let decisions = apply_supersede(decisions);
        for d in &decisions {
            info!(
                file = %d.file_name(),
                identity = ?d.identity.map(|i| i.to_string()),
                action = %d.action,
                "Resolved file"
            );
        }
        Ok(decisions)
    }

    async fn decide_entry(
        &self,
        entry: &BatchEntry,
        ledger: &LedgerState,
        cancel: &CancellationToken,
    ) -> Result<Decision, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let fingerprint = match artifacts::fingerprint(&entry.path).await {
            Ok(fp) => Some(fp),
            Err(e) => {
                return Ok(Decision::new(
                    &entry.path,
                    entry.timestamp,
                    None,
                    Action::Error {
                        message: format!("unreadable file: {e}"),
                    },
                ));
            }
        };

        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let identity = match self.probe.identify(&entry.path).await {
            Ok(identity) => identity,
            Err(e) if e.is_fatal() => return Err(ResolveError::Probe(e)),
            Err(e) => {
                warn!(file = %entry.file_name(), error = %e, "Could not determine identity");
                return Ok(Decision::new(
                    &entry.path,
                    entry.timestamp,
                    None,
                    Action::Error {
                        message: e.to_string(),
                    },
                )
                .with_fingerprint(fingerprint));
            }
        };

        let action = decide_action(ledger.get(&identity), fingerprint.as_deref(), entry.timestamp);
        Ok(Decision::new(&entry.path, entry.timestamp, Some(identity), action).with_fingerprint(fingerprint))
    }
}

/// create / update / skip for a file whose identity is known.
pub fn decide_action(existing: Option<&LedgerEntry>, fingerprint: Option<&str>, observed_at: DateTime<Utc>) -> Action {
    let Some(entry) = existing else {
        return Action::Create;
    };
    let update = || Action::Update {
        existing_id: entry.record_id.clone(),
    };
    let unchanged = Action::Skip {
        reason: SkipReason::Unchanged,
    };

    match (entry.content_hash.as_deref(), fingerprint) {
        (Some(remote), Some(local)) if remote == local => unchanged,
        (Some(_), _) => update(),
        (None, _) => match entry.last_modified {
            Some(remote) if remote >= observed_at => unchanged,
            _ => update(),
        },
    }
}

/// Within one batch, the latest-timestamped file per identity keeps its
/// action; the others become `skip: superseded-in-batch`. Equal timestamps
/// go to the later batch entry.
pub fn apply_supersede(decisions: Vec<Decision>) -> Vec<Decision> {
    let mut winners: HashMap<RecordIdentity, usize> = HashMap::new();
    for (idx, d) in decisions.iter().enumerate() {
        if let Some(identity) = d.identity {
            winners
                .entry(identity)
                .and_modify(|best| {
                    if d.timestamp >= decisions[*best].timestamp {
                        *best = idx;
                    }
                })
                .or_insert(idx);
        }
    }

    decisions
        .into_iter()
        .enumerate()
        .map(|(idx, d)| match d.identity {
            Some(identity) if winners.get(&identity) != Some(&idx) => d.superseded(),
            _ => d,
        })
        .collect()
}
