use model::core::identity::RecordIdentity;
use std::{collections::HashMap, path::Path};

/// Whitespace-separated argument list with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    tokens: Vec<String>,
}

impl ArgTemplate {
    pub fn parse(raw: &str) -> Self {
        Self {
            tokens: raw.split_whitespace().map(String::from).collect(),
        }
    }

    pub fn references(&self, name: &str) -> bool {
        let needle = format!("{{{name}}}");
        self.tokens.iter().any(|t| t.contains(&needle))
    }

    /// Substitutes every known placeholder. Unset placeholders become empty,
    /// and tokens that end up empty are dropped.
    pub fn render(&self, vars: &ArgVars) -> Vec<String> {
        self.tokens
            .iter()
            .filter_map(|token| {
                let mut out = token.clone();
                for name in ArgVars::NAMES {
                    let needle = format!("{{{name}}}");
                    if out.contains(&needle) {
                        let value = vars.values.get(name).map(String::as_str).unwrap_or("");
                        out = out.replace(&needle, value);
                    }
                }
                (!out.is_empty()).then_some(out)
            })
            .collect()
    }
}

/// Values for one rendering of an [`ArgTemplate`].
#[derive(Debug, Clone, Default)]
pub struct ArgVars {
    values: HashMap<&'static str, String>,
}

impl ArgVars {
    const NAMES: [&'static str; 7] = [
        "input",
        "output",
        "record",
        "identity",
        "action",
        "record_id",
        "content_hash",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(self, path: &Path) -> Self {
        self.with("input", path.display().to_string())
    }

    pub fn output(self, path: &Path) -> Self {
        self.with("output", path.display().to_string())
    }

    pub fn record(self, path: &Path) -> Self {
        self.with("record", path.display().to_string())
    }

    pub fn identity(self, identity: Option<RecordIdentity>) -> Self {
        match identity {
            Some(id) => self.with("identity", id.to_string()),
            None => self,
        }
    }

    pub fn action(self, action: &str) -> Self {
        self.with("action", action.to_string())
    }

    pub fn record_id(self, id: Option<&str>) -> Self {
        match id {
            Some(id) => self.with("record_id", id.to_string()),
            None => self,
        }
    }

    /// blake3 fingerprint of the source file, so the uploader can store it
    /// next to the record and later runs can skip unchanged files.
    pub fn content_hash(self, hash: Option<&str>) -> Self {
        match hash {
            Some(hash) => self.with("content_hash", hash.to_string()),
            None => self,
        }
    }

    fn with(mut self, name: &'static str, value: String) -> Self {
        self.values.insert(name, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders_in_place() {
        let template = ArgTemplate::parse("planner_digitizer.py {input} --output {output} --date={identity}");
        let args = template.render(
            &ArgVars::new()
                .input(Path::new("/w/a.jpg"))
                .output(Path::new("/o/a.jpg.json"))
                .identity(RecordIdentity::from_ymd(2025, 1, 5)),
        );
        assert_eq!(
            args,
            vec![
                "planner_digitizer.py",
                "/w/a.jpg",
                "--output",
                "/o/a.jpg.json",
                "--date=2025-01-05"
            ]
        );
    }

    #[test]
    fn drops_tokens_that_render_empty() {
        let template = ArgTemplate::parse("{record} {record_id}");
        let args = template.render(&ArgVars::new().record(Path::new("/o/r.json")));
        assert_eq!(args, vec!["/o/r.json"]);
        assert!(template.references("record_id"));
        assert!(!template.references("input"));
    }

    #[test]
    fn content_hash_is_substituted() {
        let template = ArgTemplate::parse("{record} --hash={content_hash}");
        let args = template.render(&ArgVars::new().record(Path::new("/o/r.json")).content_hash(Some("ab12")));
        assert_eq!(args, vec!["/o/r.json", "--hash=ab12"]);
    }
}
