use super::{
    decision::{Action, SkipReason},
    step::{Stage, StepResult},
};
use crate::core::{
    identifiers::{BatchId, RunId},
    identity::RecordIdentity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Succeeded,
    Failed { stage: Option<Stage>, detail: String },
    Skipped { reason: SkipReason },
}

/// Terminal result for one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub identity: Option<RecordIdentity>,
    pub action: Action,
    pub status: FileStatus,
    pub steps: Vec<StepResult>,
}

impl FileOutcome {
    pub fn skipped(file: PathBuf, identity: Option<RecordIdentity>, action: Action, reason: SkipReason) -> Self {
        Self {
            file,
            identity,
            action,
            status: FileStatus::Skipped { reason },
            steps: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FileStatus::Failed { .. })
    }

    /// Identity written to the ledger by this outcome, if any.
    pub fn uploaded_identity(&self) -> Option<RecordIdentity> {
        match self.status {
            FileStatus::Succeeded => self.identity,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub file: PathBuf,
    pub stage: Option<Stage>,
    pub detail: String,
}

/// Aggregate of one pipeline pass over a batch.
///
/// Only the orchestrator mutates a summary; workers hand back outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub batch_id: BatchId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub gaps: Vec<RecordIdentity>,
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn new(run_id: RunId, batch_id: BatchId, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            batch_id,
            started_at,
            finished_at: None,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            created: 0,
            updated: 0,
            gaps: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &FileOutcome) {
        self.processed += 1;
        match &outcome.status {
            FileStatus::Succeeded => {
                self.succeeded += 1;
                match outcome.action {
                    Action::Create => self.created += 1,
                    Action::Update { .. } => self.updated += 1,
                    _ => {}
                }
            }
            FileStatus::Failed { stage, detail } => {
                self.failed += 1;
                self.failures.push(FailureRecord {
                    file: outcome.file.clone(),
                    stage: *stage,
                    detail: detail.clone(),
                });
            }
            FileStatus::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn finish(&mut self, gaps: Vec<RecordIdentity>, at: DateTime<Utc>) {
        self.gaps = gaps;
        self.finished_at = Some(at);
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|f| (f - self.started_at).num_milliseconds())
    }
}
