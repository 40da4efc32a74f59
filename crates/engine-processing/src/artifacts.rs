use chrono::{DateTime, Utc};
use model::execution::stats::OutputStats;
use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

/// Deterministic record path for a source file: `<output_dir>/<file name>.json`.
pub fn record_path(output_dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    output_dir.join(format!("{name}.json"))
}

/// Removes a leftover record so a missing artifact after extract is detectable.
pub async fn clear_stale(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// blake3 hex digest of a file's content.
pub async fn fingerprint(path: &Path) -> io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn is_record(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Record files directly under `output_dir`, with their modification time.
async fn records_in(output_dir: &Path) -> io::Result<Vec<(PathBuf, SystemTime)>> {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_record(&path) {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() {
            records.push((path, meta.modified()?));
        }
    }
    Ok(records)
}

/// How many records the outputs folder holds and when the newest was written.
pub async fn output_stats(output_dir: &Path) -> io::Result<OutputStats> {
    let records = records_in(output_dir).await?;
    Ok(OutputStats {
        output_dir: output_dir.to_path_buf(),
        records: records.len(),
        last_written_at: records.iter().map(|(_, m)| DateTime::<Utc>::from(*m)).max(),
    })
}

/// Deletes records last written more than `max_age` ago and returns how many
/// were removed. A record that cannot be removed is logged and left behind.
pub async fn sweep_expired(output_dir: &Path, max_age: Duration) -> io::Result<usize> {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Ok(0);
    };

    let mut removed = 0;
    for (path, modified) in records_in(output_dir).await? {
        if modified >= cutoff {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(record = %path.display(), "Removed expired record");
                removed += 1;
            }
            Err(e) => warn!(record = %path.display(), error = %e, "Could not remove expired record"),
        }
    }
    if removed > 0 {
        info!(removed, output_dir = %output_dir.display(), "Expired records cleaned up");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age(path: &Path, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * 86_400);
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[test]
    fn record_path_keeps_source_extension() {
        let path = record_path(Path::new("/data/outputs"), Path::new("/data/scans/2025-01-05.jpg"));
        assert_eq!(path, PathBuf::from("/data/outputs/2025-01-05.jpg.json"));
    }

    #[tokio::test]
    async fn clear_stale_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg.json");
        clear_stale(&path).await.unwrap();

        std::fs::write(&path, "{}").unwrap();
        clear_stale(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, b"one").unwrap();
        let first = fingerprint(&path).await.unwrap();
        std::fs::write(&path, b"two").unwrap();
        assert_ne!(first, fingerprint(&path).await.unwrap());
        assert_eq!(first.len(), 64);
    }

    #[tokio::test]
    async fn sweep_removes_only_old_records() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("2024-11-02.jpg.json");
        let fresh = dir.path().join("2025-01-05.jpg.json");
        let notes = dir.path().join("notes.txt");
        for path in [&old, &fresh, &notes] {
            std::fs::write(path, "{}").unwrap();
        }
        age(&old, 45);
        age(&notes, 45);

        let removed = sweep_expired(dir.path(), Duration::from_secs(30 * 86_400)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(notes.exists());
    }

    #[tokio::test]
    async fn stats_count_records_and_newest_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.png.json"), "{}").unwrap();
        std::fs::write(dir.path().join("ignored.log"), "").unwrap();
        age(&dir.path().join("a.jpg.json"), 3);

        let stats = output_stats(dir.path()).await.unwrap();
        assert_eq!(stats.records, 2);
        let newest = stats.last_written_at.unwrap();
        assert!(Utc::now() - newest < chrono::Duration::minutes(5));

        let missing = output_stats(&dir.path().join("nope")).await.unwrap();
        assert_eq!(missing.records, 0);
        assert_eq!(missing.last_written_at, None);
    }
}
