use crate::{
    error::LedgerError,
    process::{CommandSpec, run_command},
    retry::{RetryDisposition, RetryPolicy},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    core::identity::RecordIdentity,
    execution::ledger::{LedgerEntry, LedgerState},
};
use serde::Deserialize;
use std::{path::PathBuf, sync::RwLock, time::Duration};
use tracing::{info, warn};

/// Read side of the remote record store.
///
/// Writes happen only as a side effect of the external upload stage.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn fetch_state(&self) -> Result<LedgerState, LedgerError>;
}

/// Queries the ledger by running an external command that prints JSON,
/// or writes it to `output_file`.
#[derive(Debug, Clone)]
pub struct CommandLedgerClient {
    command: CommandSpec,
    output_file: Option<PathBuf>,
    timeout: Duration,
    policy: RetryPolicy,
}

impl CommandLedgerClient {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self {
            command,
            output_file: None,
            timeout,
            policy: RetryPolicy::for_ledger(),
        }
    }

    pub fn with_output_file(mut self, path: Option<PathBuf>) -> Self {
        self.output_file = path;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn query_once(&self) -> Result<LedgerState, LedgerError> {
        let output = run_command(&self.command, self.timeout).await?;
        if output.timed_out {
            return Err(LedgerError::Timeout(self.timeout));
        }
        if !output.success() {
            let detail = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output")
                .trim()
                .to_string();
            return Err(LedgerError::QueryFailed {
                exit_code: output.exit_code,
                detail,
            });
        }

        let text = match &self.output_file {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| LedgerError::ReadOutput {
                    path: path.clone(),
                    source,
                })?,
            None => output.stdout,
        };

        let entries = parse_ledger_json(&text)?;
        Ok(LedgerState::new(entries, Utc::now()))
    }
}

#[async_trait]
impl LedgerClient for CommandLedgerClient {
    async fn fetch_state(&self) -> Result<LedgerState, LedgerError> {
        let state = self
            .policy
            .run(
                |_| self.query_once(),
                |err: &LedgerError| {
                    if err.is_transient() {
                        warn!(error = %err, "Ledger query failed, retrying");
                        RetryDisposition::Retry
                    } else {
                        RetryDisposition::Stop
                    }
                },
            )
            .await
            .map_err(|e| e.into_inner())?;

        info!(records = state.len(), "Fetched ledger state");
        Ok(state)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerDocument {
    Wrapped { pages: Vec<RawPage> },
    Bare(Vec<RawPage>),
}

#[derive(Debug, Deserialize)]
struct RawPage {
    date: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    last_edited_time: Option<String>,
    #[serde(default)]
    content_hash: Option<String>,
}

/// Parses `{"pages": [...]}` or a bare array of page objects.
///
/// Pages without a usable date are skipped with a warning.
pub fn parse_ledger_json(text: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
    let pages = match serde_json::from_str::<LedgerDocument>(text)? {
        LedgerDocument::Wrapped { pages } => pages,
        LedgerDocument::Bare(pages) => pages,
    };

    let mut entries = Vec::with_capacity(pages.len());
    for page in pages {
        let Some(raw_date) = page.date.as_deref() else {
            warn!(page_id = ?page.id, "Ledger page has no date, skipping");
            continue;
        };
        let identity = match raw_date.get(..10).unwrap_or(raw_date).parse::<RecordIdentity>() {
            Ok(identity) => identity,
            Err(e) => {
                warn!(page_id = ?page.id, error = %e, "Skipping ledger page");
                continue;
            }
        };

        let mut entry = LedgerEntry::new(identity);
        entry.record_id = page.id;
        entry.content_hash = page.content_hash;
        entry.last_modified = page
            .last_edited_time
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        entries.push(entry);
    }
    Ok(entries)
}

/// Ledger held in memory. Used when no query command is configured.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(state: LedgerState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Swaps in a new remote view, as an external writer would.
    pub fn replace(&self, state: LedgerState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn fetch_state(&self) -> Result<LedgerState, LedgerError> {
        Ok(self
            .state
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> RecordIdentity {
        RecordIdentity::from_ymd(2025, 1, d).unwrap()
    }

    #[test]
    fn parses_wrapped_and_bare_documents() {
        let wrapped = r#"{"pages": [
            {"date": "2025-01-01", "id": "p1", "last_edited_time": "2025-01-02T08:00:00.000Z"},
            {"date": "2025-01-03T00:00:00Z", "id": "p3", "content_hash": "abc"},
            {"date": "not a date", "id": "bad"},
            {"id": "undated"}
        ]}"#;
        let entries = parse_ledger_json(wrapped).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].identity, day(1));
        assert!(entries[0].last_modified.is_some());
        assert_eq!(entries[1].identity, day(3));
        assert_eq!(entries[1].content_hash.as_deref(), Some("abc"));

        let bare = r#"[{"date": "2025-01-05"}]"#;
        assert_eq!(parse_ledger_json(bare).unwrap()[0].identity, day(5));
    }

    #[test]
    fn malformed_output_is_not_transient() {
        let err = parse_ledger_json("{oops").unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn command_client_reads_stdout() {
        let client = CommandLedgerClient::new(
            CommandSpec::new(
                "sh",
                vec!["-c".into(), r#"echo '[{"date":"2025-01-02","id":"x"}]'"#.into()],
            ),
            Duration::from_secs(5),
        );
        let state = client.fetch_state().await.unwrap();
        assert!(state.contains(&day(2)));
    }

    #[tokio::test]
    async fn command_client_reads_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pages.json");
        let script = format!(
            r#"echo '{{"pages":[{{"date":"2025-01-04"}}]}}' > {}"#,
            out.display()
        );
        let client = CommandLedgerClient::new(
            CommandSpec::new("sh", vec!["-c".into(), script]),
            Duration::from_secs(5),
        )
        .with_output_file(Some(out));

        let state = client.fetch_state().await.unwrap();
        assert_eq!(state.identities().into_iter().collect::<Vec<_>>(), vec![day(4)]);
    }

    #[tokio::test]
    async fn failing_query_is_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");
        let script = format!("echo x >> {}; echo unreachable >&2; exit 1", counter.display());
        let client = CommandLedgerClient::new(
            CommandSpec::new("sh", vec!["-c".into(), script]),
            Duration::from_secs(5),
        )
        .with_policy(RetryPolicy::immediate(3));

        let err = client.fetch_state().await.unwrap_err();
        assert!(matches!(err, LedgerError::QueryFailed { exit_code: Some(1), .. }));
        let calls = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 3);
    }

    #[tokio::test]
    async fn in_memory_ledger_returns_snapshots() {
        let ledger = InMemoryLedger::empty();
        assert!(ledger.fetch_state().await.unwrap().is_empty());

        ledger.replace(LedgerState::new([LedgerEntry::new(day(9))], Utc::now()));
        assert!(ledger.fetch_state().await.unwrap().contains(&day(9)));
    }
}
