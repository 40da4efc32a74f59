use engine_config::settings::Settings;
use engine_core::process::resolve_program;
use serde::Serialize;
use std::path::Path;

const WRITE_PROBE: &str = ".scanflow-write-test";

/// Outcome of one environment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

pub fn check_environment(settings: &Settings) -> Vec<Check> {
    let mut checks = vec![
        match settings.validate() {
            Ok(()) => Check::pass("settings", "valid"),
            Err(e) => Check::fail("settings", e.to_string()),
        },
        watch_folder(&settings.watch.folder),
        outputs_writable(&settings.watch.output_dir),
    ];

    let working_dir = settings.working_dir.as_deref();
    if let Some(dir) = working_dir {
        checks.push(if dir.is_dir() {
            Check::pass("working dir", dir.display().to_string())
        } else {
            Check::fail("working dir", format!("{} is not a directory", dir.display()))
        });
    }

    let programs = [
        ("extract program", Some(settings.extract.program.as_str())),
        ("upload program", Some(settings.upload.program.as_str())),
        ("ledger program", settings.ledger.program.as_deref()),
    ];
    for (name, program) in programs {
        match program {
            Some(p) if !p.is_empty() => checks.push(program_check(name, p, working_dir)),
            Some(_) => checks.push(Check::fail(name, "not configured")),
            None => {}
        }
    }
    checks
}

fn watch_folder(folder: &Path) -> Check {
    if folder.is_dir() {
        Check::pass("watch folder", folder.display().to_string())
    } else {
        Check::fail("watch folder", format!("{} does not exist", folder.display()))
    }
}

fn outputs_writable(dir: &Path) -> Check {
    let probe = dir.join(WRITE_PROBE);
    let result = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .and_then(|_| std::fs::remove_file(&probe));
    match result {
        Ok(()) => Check::pass("outputs folder", dir.display().to_string()),
        Err(e) => Check::fail("outputs folder", format!("{} is not writable: {e}", dir.display())),
    }
}

fn program_check(name: &str, program: &str, working_dir: Option<&Path>) -> Check {
    match resolve_program(program, working_dir) {
        Some(path) => Check::pass(name, path.display().to_string()),
        None => Check::fail(name, format!("'{program}' not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path) -> Settings {
        let mut s = Settings::default();
        s.watch.folder = root.join("scans");
        s.watch.output_dir = root.join("outputs");
        s.extract.program = "sh".into();
        s.upload.program = root.join("bin/upload").display().to_string();
        s
    }

    #[test]
    fn passes_with_complete_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scans")).unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/upload"), "#!/bin/sh\n").unwrap();

        let checks = check_environment(&settings(dir.path()));

        assert!(checks.iter().all(|c| c.passed), "{checks:?}");
        assert!(dir.path().join("outputs").is_dir());
        assert!(!dir.path().join("outputs").join(WRITE_PROBE).exists());
    }

    #[test]
    fn reports_missing_folder_and_program() {
        let dir = tempfile::tempdir().unwrap();

        let checks = check_environment(&settings(dir.path()));
        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();

        assert_eq!(failed, vec!["watch folder", "upload program"]);
    }
}
