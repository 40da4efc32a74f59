use engine_config::{env::EnvManager, settings::Settings};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tempfile::TempDir;

/// Fake extract stage. In probe mode (`--test`) it prints the scanned file's
/// contents so the date can be recovered from them; otherwise it writes a
/// record to the output path.
const EXTRACT_SCRIPT: &str = r#"#!/bin/sh
if [ "$2" = "--test" ]; then
  cat "$1"
  exit 0
fi
printf '{"source": "%s"}\n' "$1" > "$3"
"#;

/// Throwaway watch folder, outputs folder and fake external programs.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        for sub in ["watch", "outputs", "bin"] {
            fs::create_dir_all(dir.path().join(sub)).expect("create workspace dir");
        }
        let ws = Self { dir };
        ws.script("extract.sh", EXTRACT_SCRIPT);
        ws.upload_script("");
        ws.write_ledger(&[]);
        ws.script("ledger.sh", &format!("#!/bin/sh\ncat '{}'\n", ws.ledger_file().display()));
        ws
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn watch_dir(&self) -> PathBuf {
        self.path().join("watch")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("outputs")
    }

    pub fn bin(&self, name: &str) -> PathBuf {
        self.path().join("bin").join(name)
    }

    fn upload_log(&self) -> PathBuf {
        self.path().join("uploads.log")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.path().join("ledger.json")
    }

    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin(name);
        fs::write(&path, body).expect("write script");
        path
    }

    /// Upload stage that logs `<record name> <action>` and then runs `tail`.
    pub fn upload_script(&self, tail: &str) -> PathBuf {
        let body = format!(
            "#!/bin/sh\necho \"$(basename \"$1\") $2\" >> '{}'\n{tail}\n",
            self.upload_log().display()
        );
        self.script("upload.sh", &body)
    }

    /// Ledger pages as `(date, page id)`.
    pub fn write_ledger(&self, pages: &[(&str, &str)]) {
        let pages: Vec<serde_json::Value> = pages
            .iter()
            .map(|(date, id)| serde_json::json!({ "date": date, "id": id }))
            .collect();
        let doc = serde_json::json!({ "pages": pages });
        fs::write(self.ledger_file(), doc.to_string()).expect("write ledger");
    }

    pub fn drop_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.watch_dir().join(name);
        fs::write(&path, contents).expect("write scan");
        path
    }

    pub fn uploads(&self) -> Vec<String> {
        fs::read_to_string(self.upload_log())
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn env(&self, overrides: &[(&str, &str)]) -> EnvManager {
        let extract = self.bin("extract.sh").display().to_string();
        let upload = self.bin("upload.sh").display().to_string();
        let mut env = EnvManager::from_vars([
            ("WATCH_FOLDER", self.watch_dir().display().to_string()),
            ("OUTPUT_DIR", self.output_dir().display().to_string()),
            ("PAUSE_SECONDS", "1".to_string()),
            ("EXTRACT_PROGRAM", "sh".to_string()),
            ("EXTRACT_ARGS", format!("{extract} {{input}} --output {{output}}")),
            ("IDENTITY_ARGS", format!("{extract} {{input}} --test")),
            ("UPLOAD_PROGRAM", "sh".to_string()),
            ("UPLOAD_ARGS", format!("{upload} {{record}} {{action}}")),
            ("LEDGER_QUERY_PROGRAM", "sh".to_string()),
            ("LEDGER_QUERY_ARGS", self.bin("ledger.sh").display().to_string()),
            ("RETRY_ATTEMPTS", "3".to_string()),
            ("RETRY_BASE_DELAY_MS", "10".to_string()),
            ("RETRY_MAX_DELAY_MS", "50".to_string()),
        ]);
        for (key, value) in overrides {
            env.set(*key, *value);
        }
        env
    }

    pub fn settings(&self, overrides: &[(&str, &str)]) -> Settings {
        let settings = Settings::from_env(&self.env(overrides)).expect("parse settings");
        settings.validate().expect("valid settings");
        settings
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Backdates a file's modification time.
pub fn set_age(path: &Path, age: Duration) {
    let file = fs::File::options().write(true).open(path).expect("open for mtime");
    file.set_modified(SystemTime::now() - age).expect("set mtime");
}
