use super::{IdentitySource, Settings, error::SettingsError};
use model::core::identity::IdentityRange;
use tracing::{info, warn};

impl Settings {
    /// Checks required keys and value ranges, collecting every problem.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut errors = Vec::new();

        if self.watch.folder.as_os_str().is_empty() {
            errors.push("WATCH_FOLDER is required".to_string());
        }
        if self.extract.program.is_empty() {
            errors.push("EXTRACT_PROGRAM is required".to_string());
        }
        if self.upload.program.is_empty() {
            errors.push("UPLOAD_PROGRAM is required".to_string());
        }
        if self.watch.extensions.is_empty() {
            errors.push("WATCH_EXTENSIONS must list at least one extension".to_string());
        }
        if self.watch.queue_capacity == 0 {
            errors.push("EVENT_QUEUE_CAPACITY must be greater than zero".to_string());
        }
        if self.retry.attempts == 0 {
            errors.push("RETRY_ATTEMPTS must be at least 1".to_string());
        }
        if self.max_concurrency == 0 {
            errors.push("MAX_CONCURRENCY must be at least 1".to_string());
        }

        for (key, timeout) in [
            ("EXTRACT_TIMEOUT_SECS", self.extract.timeout),
            ("UPLOAD_TIMEOUT_SECS", self.upload.timeout),
            ("IDENTITY_TIMEOUT_SECS", self.identity.timeout),
            ("LEDGER_QUERY_TIMEOUT_SECS", self.ledger.timeout),
            ("NOTIFY_TIMEOUT_SECS", self.notify.timeout),
        ] {
            if timeout.is_zero() {
                errors.push(format!("{key} must be greater than zero"));
            }
        }

        if !self.extract.args.contains("{input}") {
            errors.push("EXTRACT_ARGS must reference {input}".to_string());
        }
        if self.identity.source != IdentitySource::Filename && !self.identity.args.contains("{input}") {
            errors.push("IDENTITY_ARGS must reference {input}".to_string());
        }

        if let Err(e) = self.gap_range() {
            errors.push(e.to_string());
        }

        if let Some(url) = &self.notify.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push("NOTIFY_WEBHOOK_URL must be an http(s) URL".to_string());
            }
        }

        if self.watch.idle_window.is_zero() {
            warn!("Idle window is zero, every event burst will close a batch immediately");
        }

        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        info!(
            watch_folder = %self.watch.folder.display(),
            idle_secs = self.watch.idle_window.as_secs(),
            attempts = self.retry.attempts,
            max_concurrency = self.max_concurrency,
            "Settings validated"
        );
        Ok(())
    }

    /// Fixed gap range, when both bounds are configured.
    pub fn gap_range(&self) -> Result<Option<IdentityRange>, SettingsError> {
        match (self.gaps.range_start, self.gaps.range_end) {
            (Some(start), Some(end)) => IdentityRange::new(start, end)
                .map(Some)
                .map_err(|e| SettingsError::Invalid {
                    key: "GAP_RANGE_START".to_string(),
                    value: start.to_string(),
                    reason: e.to_string(),
                }),
            (None, None) => Ok(None),
            _ => Err(SettingsError::Invalid {
                key: "GAP_RANGE_END".to_string(),
                value: String::new(),
                reason: "GAP_RANGE_START and GAP_RANGE_END must be set together".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvManager;
    use std::time::Duration;

    fn complete() -> Settings {
        let env = EnvManager::from_vars([
            ("WATCH_FOLDER", "/scans"),
            ("EXTRACT_PROGRAM", "digitize"),
            ("UPLOAD_PROGRAM", "upload"),
        ]);
        Settings::from_env(&env).unwrap()
    }

    #[test]
    fn complete_settings_pass() {
        complete().validate().unwrap();
    }

    #[test]
    fn collects_every_problem() {
        let mut s = Settings::default();
        s.retry.attempts = 0;
        s.upload.timeout = Duration::ZERO;
        s.watch.extensions.clear();

        let SettingsError::ValidationFailed(errors) = s.validate().unwrap_err() else {
            panic!("expected validation failure");
        };
        assert!(errors.iter().any(|e| e.contains("WATCH_FOLDER")));
        assert!(errors.iter().any(|e| e.contains("EXTRACT_PROGRAM")));
        assert!(errors.iter().any(|e| e.contains("RETRY_ATTEMPTS")));
        assert!(errors.iter().any(|e| e.contains("UPLOAD_TIMEOUT_SECS")));
        assert!(errors.iter().any(|e| e.contains("WATCH_EXTENSIONS")));
    }

    #[test]
    fn half_open_gap_range_is_rejected() {
        let mut s = complete();
        s.gaps.range_start = model::core::identity::RecordIdentity::from_ymd(2025, 1, 1);
        assert!(s.validate().is_err());
    }

    #[test]
    fn inverted_gap_range_is_rejected() {
        let mut s = complete();
        s.gaps.range_start = model::core::identity::RecordIdentity::from_ymd(2025, 2, 1);
        s.gaps.range_end = model::core::identity::RecordIdentity::from_ymd(2025, 1, 1);
        assert!(s.gap_range().is_err());
    }
}
