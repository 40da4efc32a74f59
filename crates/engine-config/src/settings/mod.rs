use crate::env::EnvManager;
use error::SettingsError;
use model::core::identity::RecordIdentity;
use serde::{Serialize, Serializer};
use std::{path::PathBuf, time::Duration};

pub mod error;
pub mod validator;

/// Every key read by [`Settings::from_env`].
pub const KNOWN_KEYS: &[&str] = &[
    "WATCH_FOLDER",
    "OUTPUT_DIR",
    "PAUSE_SECONDS",
    "PAUSE_MINUTES",
    "WATCH_RECURSIVE",
    "WATCH_EXTENSIONS",
    "STARTUP_SCAN_LIMIT",
    "EVENT_QUEUE_CAPACITY",
    "RETRY_ATTEMPTS",
    "RETRY_BASE_DELAY_MS",
    "RETRY_MAX_DELAY_MS",
    "MAX_CONCURRENCY",
    "BATCH_SIZE",
    "EXTRACT_PROGRAM",
    "EXTRACT_ARGS",
    "EXTRACT_TIMEOUT_SECS",
    "UPLOAD_PROGRAM",
    "UPLOAD_ARGS",
    "UPLOAD_TIMEOUT_SECS",
    "DIGITIZER_PATH",
    "IDENTITY_SOURCE",
    "IDENTITY_ARGS",
    "IDENTITY_TIMEOUT_SECS",
    "LEDGER_QUERY_PROGRAM",
    "LEDGER_QUERY_ARGS",
    "LEDGER_QUERY_OUTPUT",
    "LEDGER_QUERY_TIMEOUT_SECS",
    "NOTIFY_WEBHOOK_URL",
    "NOTIFY_TIMEOUT_SECS",
    "GAP_RANGE_START",
    "GAP_RANGE_END",
    "GAP_LOOKBACK_DAYS",
    "REMINDER_INTERVAL_HOURS",
    "OUTPUT_RETENTION_DAYS",
    "LOG_LEVEL",
    "NOTION_TOKEN",
    "NOTION_DATABASE_ID",
    "OPENAI_API_KEY",
];

/// Runtime configuration, built once at startup and handed to each component.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub watch: WatchSettings,
    pub retry: RetrySettings,
    pub max_concurrency: usize,
    pub extract: StageSettings,
    pub upload: StageSettings,
    /// Working directory for every external program.
    pub working_dir: Option<PathBuf>,
    pub identity: IdentitySettings,
    pub ledger: LedgerSettings,
    pub notify: NotifySettings,
    pub gaps: GapSettings,
    pub housekeeping: HousekeepingSettings,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchSettings {
    pub folder: PathBuf,
    pub output_dir: PathBuf,
    #[serde(serialize_with = "human_duration")]
    pub idle_window: Duration,
    pub recursive: bool,
    pub extensions: Vec<String>,
    pub startup_scan_limit: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrySettings {
    pub attempts: usize,
    #[serde(serialize_with = "human_duration")]
    pub base_delay: Duration,
    #[serde(serialize_with = "human_duration")]
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSettings {
    pub program: String,
    pub args: String,
    #[serde(serialize_with = "human_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// Filename first, then the extract program in probe mode.
    Auto,
    Filename,
    Command,
}

impl std::str::FromStr for IdentitySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(IdentitySource::Auto),
            "filename" => Ok(IdentitySource::Filename),
            "command" => Ok(IdentitySource::Command),
            other => Err(format!("unknown identity source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitySettings {
    pub source: IdentitySource,
    pub args: String,
    #[serde(serialize_with = "human_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSettings {
    pub program: Option<String>,
    pub args: String,
    pub output_file: Option<PathBuf>,
    #[serde(serialize_with = "human_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifySettings {
    #[serde(serialize_with = "redacted_url")]
    pub webhook_url: Option<String>,
    #[serde(serialize_with = "human_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapSettings {
    pub range_start: Option<RecordIdentity>,
    pub range_end: Option<RecordIdentity>,
    pub lookback_days: u64,
}

/// Chores of the watch loop. A zero duration disables the chore.
#[derive(Debug, Clone, Serialize)]
pub struct HousekeepingSettings {
    #[serde(serialize_with = "human_duration")]
    pub reminder_interval: Duration,
    #[serde(serialize_with = "human_duration")]
    pub output_retention: Duration,
}

impl HousekeepingSettings {
    pub fn reminders(&self) -> Option<Duration> {
        Some(self.reminder_interval).filter(|d| !d.is_zero())
    }

    pub fn retention(&self) -> Option<Duration> {
        Some(self.output_retention).filter(|d| !d.is_zero())
    }
}

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch: WatchSettings {
                folder: PathBuf::new(),
                output_dir: PathBuf::new(),
                idle_window: Duration::from_secs(120),
                recursive: true,
                extensions: ["jpg", "jpeg", "png", "pdf"].map(String::from).to_vec(),
                startup_scan_limit: 10,
                queue_capacity: 1024,
            },
            retry: RetrySettings {
                attempts: 3,
                base_delay: Duration::from_millis(5000),
                max_delay: Duration::from_millis(60_000),
            },
            max_concurrency: 4,
            extract: StageSettings {
                program: String::new(),
                args: "{input} --output {output}".to_string(),
                timeout: Duration::from_secs(120),
            },
            upload: StageSettings {
                program: String::new(),
                args: "{record}".to_string(),
                timeout: Duration::from_secs(120),
            },
            working_dir: None,
            identity: IdentitySettings {
                source: IdentitySource::Auto,
                args: "{input} --test".to_string(),
                timeout: Duration::from_secs(120),
            },
            ledger: LedgerSettings {
                program: None,
                args: String::new(),
                output_file: None,
                timeout: Duration::from_secs(60),
            },
            notify: NotifySettings {
                webhook_url: None,
                timeout: Duration::from_secs(10),
            },
            gaps: GapSettings {
                range_start: None,
                range_end: None,
                lookback_days: 30,
            },
            housekeeping: HousekeepingSettings {
                reminder_interval: Duration::from_secs(7 * DAY),
                output_retention: Duration::from_secs(30 * DAY),
            },
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads every known key from `env`, falling back to defaults.
    ///
    /// Parse errors fail immediately; missing required values are reported by
    /// [`Settings::validate`].
    pub fn from_env(env: &EnvManager) -> Result<Self, SettingsError> {
        let mut s = Settings::default();

        if let Some(folder) = env.get("WATCH_FOLDER") {
            s.watch.folder = PathBuf::from(folder);
        }
        s.watch.output_dir = match env.get("OUTPUT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_output_dir(&s.watch.folder),
        };

        if let Some(secs) = env.parse::<u64>("PAUSE_SECONDS")? {
            s.watch.idle_window = Duration::from_secs(secs);
        } else if let Some(mins) = env.parse::<u64>("PAUSE_MINUTES")? {
            s.watch.idle_window = Duration::from_secs(mins.saturating_mul(60));
        }
        if let Some(recursive) = env.parse_bool("WATCH_RECURSIVE")? {
            s.watch.recursive = recursive;
        }
        if let Some(list) = env.get("WATCH_EXTENSIONS") {
            s.watch.extensions = parse_extensions(list);
        }
        set_from(env, "STARTUP_SCAN_LIMIT", &mut s.watch.startup_scan_limit)?;
        set_from(env, "EVENT_QUEUE_CAPACITY", &mut s.watch.queue_capacity)?;

        set_from(env, "RETRY_ATTEMPTS", &mut s.retry.attempts)?;
        set_millis(env, "RETRY_BASE_DELAY_MS", &mut s.retry.base_delay)?;
        set_millis(env, "RETRY_MAX_DELAY_MS", &mut s.retry.max_delay)?;

        if let Some(n) = env.parse::<usize>("MAX_CONCURRENCY")? {
            s.max_concurrency = n;
        } else {
            set_from(env, "BATCH_SIZE", &mut s.max_concurrency)?;
        }

        set_string(env, "EXTRACT_PROGRAM", &mut s.extract.program);
        set_string(env, "EXTRACT_ARGS", &mut s.extract.args);
        set_secs(env, "EXTRACT_TIMEOUT_SECS", &mut s.extract.timeout)?;
        set_string(env, "UPLOAD_PROGRAM", &mut s.upload.program);
        set_string(env, "UPLOAD_ARGS", &mut s.upload.args);
        set_secs(env, "UPLOAD_TIMEOUT_SECS", &mut s.upload.timeout)?;
        s.working_dir = env.get("DIGITIZER_PATH").map(PathBuf::from);

        set_from(env, "IDENTITY_SOURCE", &mut s.identity.source)?;
        set_string(env, "IDENTITY_ARGS", &mut s.identity.args);
        set_secs(env, "IDENTITY_TIMEOUT_SECS", &mut s.identity.timeout)?;

        s.ledger.program = env.get("LEDGER_QUERY_PROGRAM").map(String::from);
        set_string(env, "LEDGER_QUERY_ARGS", &mut s.ledger.args);
        s.ledger.output_file = env.get("LEDGER_QUERY_OUTPUT").map(PathBuf::from);
        set_secs(env, "LEDGER_QUERY_TIMEOUT_SECS", &mut s.ledger.timeout)?;

        s.notify.webhook_url = env.get("NOTIFY_WEBHOOK_URL").map(String::from);
        set_secs(env, "NOTIFY_TIMEOUT_SECS", &mut s.notify.timeout)?;

        s.gaps.range_start = env.parse("GAP_RANGE_START")?;
        s.gaps.range_end = env.parse("GAP_RANGE_END")?;
        set_from(env, "GAP_LOOKBACK_DAYS", &mut s.gaps.lookback_days)?;

        if let Some(hours) = env.parse::<u64>("REMINDER_INTERVAL_HOURS")? {
            s.housekeeping.reminder_interval = Duration::from_secs(hours.saturating_mul(HOUR));
        }
        if let Some(days) = env.parse::<u64>("OUTPUT_RETENTION_DAYS")? {
            s.housekeeping.output_retention = Duration::from_secs(days.saturating_mul(DAY));
        }

        set_string(env, "LOG_LEVEL", &mut s.log_level);
        s.log_level = s.log_level.to_ascii_lowercase();

        Ok(s)
    }
}

/// `outputs` next to the watch folder.
pub fn default_output_dir(watch_folder: &std::path::Path) -> PathBuf {
    match watch_folder.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("outputs"),
        _ => watch_folder.join("outputs"),
    }
}

fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn set_from<T>(env: &EnvManager, key: &str, target: &mut T) -> Result<(), SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = env.parse::<T>(key)? {
        *target = v;
    }
    Ok(())
}

fn set_secs(env: &EnvManager, key: &str, target: &mut Duration) -> Result<(), SettingsError> {
    if let Some(v) = env.parse::<u64>(key)? {
        *target = Duration::from_secs(v);
    }
    Ok(())
}

fn set_millis(env: &EnvManager, key: &str, target: &mut Duration) -> Result<(), SettingsError> {
    if let Some(v) = env.parse::<u64>(key)? {
        *target = Duration::from_millis(v);
    }
    Ok(())
}

fn set_string(env: &EnvManager, key: &str, target: &mut String) {
    if let Some(v) = env.get(key) {
        *target = v.to_string();
    }
}

fn human_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format!("{d:?}"))
}

fn redacted_url<S: Serializer>(url: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match url {
        Some(url) => s.serialize_some(&redact_url(url)),
        None => s.serialize_none(),
    }
}

/// Keeps scheme and host, masks path and query, which often carry tokens.
pub fn redact_url(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let host = rest.split(['/', '?']).next().unwrap_or_default();
    let masked = if host.len() < rest.len() { "/****" } else { "" };
    if scheme.is_empty() {
        format!("{host}{masked}")
    } else {
        format!("{scheme}://{host}{masked}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvManager {
        EnvManager::from_vars(pairs.iter().copied())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = Settings::from_env(&env(&[("WATCH_FOLDER", "/data/scans")])).unwrap();
        assert_eq!(s.watch.idle_window, Duration::from_secs(120));
        assert_eq!(s.watch.output_dir, PathBuf::from("/data/outputs"));
        assert_eq!(s.retry.attempts, 3);
        assert_eq!(s.max_concurrency, 4);
        assert_eq!(s.extract.args, "{input} --output {output}");
        assert_eq!(s.identity.source, IdentitySource::Auto);
    }

    #[test]
    fn legacy_keys_are_honoured() {
        let s = Settings::from_env(&env(&[("PAUSE_MINUTES", "3"), ("BATCH_SIZE", "2")])).unwrap();
        assert_eq!(s.watch.idle_window, Duration::from_secs(180));
        assert_eq!(s.max_concurrency, 2);

        let s = Settings::from_env(&env(&[
            ("PAUSE_MINUTES", "3"),
            ("PAUSE_SECONDS", "15"),
            ("BATCH_SIZE", "2"),
            ("MAX_CONCURRENCY", "8"),
        ]))
        .unwrap();
        assert_eq!(s.watch.idle_window, Duration::from_secs(15));
        assert_eq!(s.max_concurrency, 8);
    }

    #[test]
    fn housekeeping_defaults_and_zero_disables() {
        let s = Settings::from_env(&env(&[])).unwrap();
        assert_eq!(s.housekeeping.reminders(), Some(Duration::from_secs(168 * 3600)));
        assert_eq!(s.housekeeping.retention(), Some(Duration::from_secs(30 * 86_400)));

        let s = Settings::from_env(&env(&[
            ("REMINDER_INTERVAL_HOURS", "0"),
            ("OUTPUT_RETENTION_DAYS", "7"),
        ]))
        .unwrap();
        assert_eq!(s.housekeeping.reminders(), None);
        assert_eq!(s.housekeeping.retention(), Some(Duration::from_secs(7 * 86_400)));
    }

    #[test]
    fn extensions_are_normalised() {
        let s = Settings::from_env(&env(&[("WATCH_EXTENSIONS", " .JPG, png,,heic ")])).unwrap();
        assert_eq!(s.watch.extensions, vec!["jpg", "png", "heic"]);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = Settings::from_env(&env(&[("RETRY_ATTEMPTS", "three")])).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { ref key, .. } if key == "RETRY_ATTEMPTS"));
    }

    #[test]
    fn gap_range_parses_dates() {
        let s = Settings::from_env(&env(&[
            ("GAP_RANGE_START", "2025-01-01"),
            ("GAP_RANGE_END", "2025-01-31"),
        ]))
        .unwrap();
        assert_eq!(s.gaps.range_start, RecordIdentity::from_ymd(2025, 1, 1));
        assert!(s.gap_range().unwrap().is_some());
    }

    #[test]
    fn webhook_url_is_redacted_when_serialized() {
        assert_eq!(redact_url("https://hooks.example.com/T000/B000/XXXX"), "https://hooks.example.com/****");
        assert_eq!(redact_url("http://localhost:9000"), "http://localhost:9000");

        let s = Settings::from_env(&env(&[("NOTIFY_WEBHOOK_URL", "https://h.example/secret?token=1")])).unwrap();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["notify"]["webhook_url"], "https://h.example/****");
    }
}
