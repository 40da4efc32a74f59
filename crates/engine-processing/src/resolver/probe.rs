use crate::{
    args::{ArgTemplate, ArgVars},
    error::ProbeError,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::runner::StepRunner;
use model::{core::identity::RecordIdentity, execution::step::Stage};
use regex::Regex;
use std::{
    path::Path,
    sync::{Arc, LazyLock},
    time::Duration,
};
use tracing::debug;

/// Recovers the record identity of a source file.
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn identify(&self, file: &Path) -> Result<RecordIdentity, ProbeError>;
}

static FILE_NAME_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4})[-_]?(\d{2})[-_]?(\d{2})(?:\D|$)").expect("valid regex")
});
static JSON_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""date"\s*:\s*"([^"]+)""#).expect("valid regex"));
static MONTH_NAME_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]+)\s+(\d{1,2}),?\s+(\d{4})").expect("valid regex"));
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid regex"));
static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").expect("valid regex"));

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"];

/// Date in the file stem: `2025-01-05`, `20250105` or `2025_01_05`.
pub fn identity_from_file_name(path: &Path) -> Option<RecordIdentity> {
    let stem = path.file_stem()?.to_str()?;
    FILE_NAME_DATE.captures_iter(stem).find_map(|c| {
        RecordIdentity::from_ymd(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
    })
}

/// Date reported by the extract program in probe mode.
///
/// Tries a JSON `"date"` field first, then free text: "Month D, YYYY",
/// ISO dates and finally `M/D/YYYY`.
pub fn identity_from_text(text: &str) -> Option<RecordIdentity> {
    if let Some(found) = JSON_DATE
        .captures_iter(text)
        .find_map(|c| parse_date_string(&c[1]))
    {
        return Some(found);
    }

    let month_name = MONTH_NAME_DATE.captures_iter(text).find_map(|c| {
        let month = month_number(&c[1])?;
        RecordIdentity::from_ymd(c[3].parse().ok()?, month, c[2].parse().ok()?)
    });
    let iso = || {
        ISO_DATE.captures_iter(text).find_map(|c| {
            RecordIdentity::from_ymd(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
        })
    };
    let slash = || {
        SLASH_DATE.captures_iter(text).find_map(|c| {
            RecordIdentity::from_ymd(c[3].parse().ok()?, c[1].parse().ok()?, c[2].parse().ok()?)
        })
    };

    month_name.or_else(iso).or_else(slash)
}

fn parse_date_string(raw: &str) -> Option<RecordIdentity> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(RecordIdentity::new)
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let name = name.to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| *m == name || (name.len() == 3 && m.starts_with(&name)))
        .map(|i| i as u32 + 1)
}

/// Reads the identity from the file name.
#[derive(Debug, Clone, Default)]
pub struct FilenameProbe;

#[async_trait]
impl IdentityProbe for FilenameProbe {
    async fn identify(&self, file: &Path) -> Result<RecordIdentity, ProbeError> {
        identity_from_file_name(file).ok_or_else(|| ProbeError::NotFound {
            file: file.to_path_buf(),
        })
    }
}

/// Runs the extract program in probe mode and parses what it prints.
pub struct CommandProbe {
    runner: Arc<dyn StepRunner>,
    args: ArgTemplate,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(runner: Arc<dyn StepRunner>, args: ArgTemplate, timeout: Duration) -> Self {
        Self {
            runner,
            args,
            timeout,
        }
    }
}

#[async_trait]
impl IdentityProbe for CommandProbe {
    async fn identify(&self, file: &Path) -> Result<RecordIdentity, ProbeError> {
        let args = self.args.render(&ArgVars::new().input(file));
        let result = self.runner.run(Stage::Extract, &args, self.timeout).await?;
        if !result.is_success() {
            return Err(ProbeError::Step {
                file: file.to_path_buf(),
                detail: result.detail(),
            });
        }

        let identity = identity_from_text(&result.stdout).ok_or_else(|| ProbeError::NotFound {
            file: file.to_path_buf(),
        })?;
        debug!(file = %file.display(), %identity, "Identity extracted from probe output");
        Ok(identity)
    }
}

/// Tries `primary`, then `secondary` unless the first failure was fatal.
pub struct FallbackProbe {
    primary: Arc<dyn IdentityProbe>,
    secondary: Arc<dyn IdentityProbe>,
}

impl FallbackProbe {
    pub fn new(primary: Arc<dyn IdentityProbe>, secondary: Arc<dyn IdentityProbe>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl IdentityProbe for FallbackProbe {
    async fn identify(&self, file: &Path) -> Result<RecordIdentity, ProbeError> {
        match self.primary.identify(file).await {
            Ok(identity) => Ok(identity),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(file = %file.display(), error = %e, "Primary identity probe failed, trying fallback");
                self.secondary.identify(file).await
            }
        }
    }
}
