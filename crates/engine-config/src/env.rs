use crate::settings::error::SettingsError;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::str::FromStr;

const MASK: &str = "****";

/// Environment variable manager that loads from system and .env files
#[derive(Debug, Clone)]
pub struct EnvManager {
    vars: HashMap<String, String>,
    sensitive_patterns: Vec<String>,
}

impl EnvManager {
    pub fn new() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds a manager from explicit pairs instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            sensitive_patterns: Self::default_sensitive_patterns(),
        }
    }

    /// Load variables from a .env file. File values override existing ones.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;

        self.parse_env_content(&content)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Trimmed value of `key`; blank values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, SettingsError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| SettingsError::Invalid {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn parse_bool(&self, key: &str) -> Result<Option<bool>, SettingsError> {
        self.get(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(SettingsError::Invalid {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "expected true or false".to_string(),
                }),
            })
            .transpose()
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.sensitive_patterns.iter().any(|p| key.contains(p))
    }

    /// Values for `keys` that are set, with sensitive ones masked.
    pub fn masked_view<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
        keys.into_iter()
            .filter_map(|key| {
                self.get(key).map(|value| {
                    let shown = if self.is_sensitive(key) {
                        MASK.to_string()
                    } else {
                        value.to_string()
                    };
                    (key.to_string(), shown)
                })
            })
            .collect()
    }

    fn parse_env_content(&mut self, content: &str) -> Result<(), SettingsError> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                return Err(SettingsError::EnvSyntax {
                    line: line_num + 1,
                    reason: "expected KEY=VALUE".to_string(),
                });
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(SettingsError::EnvSyntax {
                    line: line_num + 1,
                    reason: "empty key".to_string(),
                });
            }

            self.vars.insert(key.to_string(), Self::unquote_value(value));
        }

        Ok(())
    }

    fn unquote_value(value: &str) -> String {
        let value = value.trim();

        for quote in ['"', '\''] {
            if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
                return value[1..value.len() - 1].to_string();
            }
        }

        value.to_string()
    }

    /// Default patterns for sensitive variable detection
    fn default_sensitive_patterns() -> Vec<String> {
        [
            "password",
            "passwd",
            "secret",
            "token",
            "api_key",
            "apikey",
            "auth",
            "credential",
            "private",
            "webhook",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

impl Default for EnvManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> EnvManager {
        EnvManager::from_vars(Vec::<(String, String)>::new())
    }

    #[test]
    fn test_parse_basic_env() {
        let mut env = empty();
        let content = r#"
# Comment
WATCH_FOLDER=/scans
export PAUSE_SECONDS=30
        "#;

        env.parse_env_content(content).unwrap();
        assert_eq!(env.get("WATCH_FOLDER"), Some("/scans"));
        assert_eq!(env.get("PAUSE_SECONDS"), Some("30"));
    }

    #[test]
    fn test_parse_quoted_values() {
        let mut env = empty();
        let content = r#"
QUOTED="value with spaces"
SINGLE='single quoted'
UNQUOTED=no_spaces
        "#;

        env.parse_env_content(content).unwrap();
        assert_eq!(env.get("QUOTED"), Some("value with spaces"));
        assert_eq!(env.get("SINGLE"), Some("single quoted"));
        assert_eq!(env.get("UNQUOTED"), Some("no_spaces"));
    }

    #[test]
    fn test_invalid_env_format() {
        let mut env = empty();
        let err = env.parse_env_content("OK=1\nINVALID LINE").unwrap_err();
        assert!(matches!(err, SettingsError::EnvSyntax { line: 2, .. }));
    }

    #[test]
    fn test_env_file_overrides_process_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "RETRY_ATTEMPTS=5\n").unwrap();

        let mut env = EnvManager::from_vars([("RETRY_ATTEMPTS", "3")]);
        env.load_from_file(&path).unwrap();
        assert_eq!(env.parse::<u32>("RETRY_ATTEMPTS").unwrap(), Some(5));
    }

    #[test]
    fn test_masks_sensitive_keys() {
        let env = EnvManager::from_vars([("NOTION_TOKEN", "secret-value"), ("LOG_LEVEL", "debug")]);
        let view = env.masked_view(["NOTION_TOKEN", "LOG_LEVEL", "UNSET"]);
        assert_eq!(view.get("NOTION_TOKEN").map(String::as_str), Some("****"));
        assert_eq!(view.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert!(!view.contains_key("UNSET"));
    }

    #[test]
    fn test_typed_parsing_reports_key() {
        let env = EnvManager::from_vars([("WATCH_RECURSIVE", "maybe"), ("MAX_CONCURRENCY", "x")]);
        assert!(env.parse_bool("WATCH_RECURSIVE").is_err());
        let err = env.parse::<usize>("MAX_CONCURRENCY").unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENCY"));
    }
}
