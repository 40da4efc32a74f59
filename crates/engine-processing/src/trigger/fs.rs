use super::accumulator::EligibilityFilter;
use crate::error::TriggerError;
use chrono::{DateTime, Utc};
use model::records::watch::{WatchEvent, WatchEventKind};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{CreateKind, ModifyKind, RenameMode},
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub type EventSender = mpsc::Sender<Result<WatchEvent, TriggerError>>;
pub type EventReceiver = mpsc::Receiver<Result<WatchEvent, TriggerError>>;

/// OS-level watch on the watch folder, feeding a bounded queue.
///
/// Dropping the source stops the watch.
pub struct FsWatchSource {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl std::fmt::Debug for FsWatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatchSource").field("root", &self.root).finish()
    }
}

impl FsWatchSource {
    pub fn start(root: &Path, recursive: bool, capacity: usize) -> Result<(Self, EventReceiver), TriggerError> {
        if !root.is_dir() {
            return Err(TriggerError::WatchFolderMissing(root.to_path_buf()));
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let watched_root = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward(&tx, &watched_root, res);
        })
        .map_err(|e| TriggerError::Backend(e.to_string()))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .map_err(|e| TriggerError::Backend(e.to_string()))?;

        debug!(root = %root.display(), recursive, "Watching folder");
        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Runs on the watcher's own thread, outside the tokio runtime.
fn forward(tx: &EventSender, root: &Path, res: notify::Result<Event>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            let _ = tx.blocking_send(Err(TriggerError::Backend(e.to_string())));
            return;
        }
    };

    let kind = match event.kind {
        EventKind::Create(CreateKind::Folder) => None,
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both | RenameMode::Any)) => {
            Some(WatchEventKind::Created)
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(WatchEventKind::Modified),
        EventKind::Remove(_) if event.paths.iter().any(|p| p == root) => {
            let _ = tx.blocking_send(Err(TriggerError::WatchFolderMissing(root.to_path_buf())));
            return;
        }
        _ => None,
    };
    let Some(kind) = kind else {
        return;
    };

    // For a two-sided rename the destination comes last.
    let Some(path) = event.paths.last() else {
        return;
    };
    let watch_event = WatchEvent::new(path.clone(), kind, modified_at(path));
    if tx.blocking_send(Ok(watch_event)).is_err() {
        debug!("Event queue closed, dropping watch event");
    }
}

/// File modification time, or now when it cannot be read.
pub fn modified_at(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Eligible files already present in `root`, newest first, at most `limit`.
pub fn scan_existing(
    root: &Path,
    recursive: bool,
    filter: &EligibilityFilter,
    limit: usize,
) -> Vec<WatchEvent> {
    if limit == 0 {
        return Vec::new();
    }

    let depth = if recursive { usize::MAX } else { 1 };
    let mut found: Vec<WatchEvent> = WalkDir::new(root)
        .max_depth(depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during startup scan");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && filter.accepts(entry.path()))
        .map(|entry| WatchEvent::created(entry.path(), modified_at(entry.path())))
        .collect();

    found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.path.cmp(&b.path)));
    found.truncate(limit);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, age_secs: u64) {
        std::fs::write(path, b"content").unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn startup_scan_returns_newest_eligible_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("old.jpg"), 300);
        touch(&dir.path().join("new.jpg"), 10);
        touch(&dir.path().join("mid.pdf"), 100);
        touch(&dir.path().join("skip.txt"), 1);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested/deep.png"), 5);

        let filter = EligibilityFilter::new(["jpg", "pdf", "png"]);
        let found = scan_existing(dir.path(), false, &filter, 2);
        let names: Vec<_> = found
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["new.jpg", "mid.pdf"]);

        let recursive = scan_existing(dir.path(), true, &filter, 10);
        assert_eq!(recursive.len(), 4);
        assert!(scan_existing(dir.path(), true, &filter, 0).is_empty());
    }

    #[test]
    fn start_fails_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = FsWatchSource::start(&missing, true, 8).unwrap_err();
        assert!(matches!(err, TriggerError::WatchFolderMissing(_)));
    }

    #[tokio::test]
    async fn forwards_created_files() {
        let dir = tempfile::tempdir().unwrap();
        let (_source, mut rx) = FsWatchSource::start(dir.path(), true, 64).unwrap();

        let scan = dir.path().join("2025-01-05.jpg");
        std::fs::write(&scan, b"scan").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(Ok(event)) if event.path.ends_with("2025-01-05.jpg") => break event,
                    Some(_) => continue,
                    None => panic!("queue closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.extension().as_deref(), Some("jpg"));
    }
}
