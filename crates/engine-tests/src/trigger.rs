#[cfg(test)]
mod tests {
    use crate::utils::Workspace;
    use engine_processing::error::TriggerError;
    use engine_runtime::{
        factory,
        orchestrator::OrchestratorState,
    };
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    // Scenario: a scan lands, then is overwritten shortly after.
    // Expected Outcome: once the folder is quiet for the idle window, one
    // batch with a single entry is produced.
    #[traced_test]
    #[tokio::test]
    async fn overwrite_within_window_yields_one_entry() {
        let ws = Workspace::new();
        let settings = ws.settings(&[]);
        let mut trigger = factory::create_trigger(&settings).unwrap();

        let path = ws.drop_file("2025-01-05.jpg", "first pass");
        sleep(Duration::from_millis(300)).await;
        ws.drop_file("2025-01-05.jpg", "second pass");

        let batch = timeout(Duration::from_secs(10), trigger.next_batch())
            .await
            .expect("batch settled")
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.entries()[0].path, path);
    }

    // Scenario: files already in the folder at startup.
    // Expected Outcome: they are seeded and form the first batch without any
    // new filesystem activity.
    #[traced_test]
    #[tokio::test]
    async fn startup_scan_seeds_first_batch() {
        let ws = Workspace::new();
        ws.drop_file("2025-01-05.jpg", "scan");
        ws.drop_file("2025-01-06.png", "scan");
        ws.drop_file("notes.txt", "not a scan");
        let settings = ws.settings(&[]);

        let mut trigger = factory::create_trigger(&settings).unwrap();
        let batch = timeout(Duration::from_secs(10), trigger.next_batch())
            .await
            .expect("batch settled")
            .unwrap();

        assert_eq!(batch.len(), 2);
    }

    // Scenario: the watch folder is removed while files are pending.
    // Expected Outcome: the trigger reports the loss instead of a batch.
    #[traced_test]
    #[tokio::test]
    async fn losing_the_watch_folder_is_reported() {
        let ws = Workspace::new();
        let settings = ws.settings(&[]);
        let mut trigger = factory::create_trigger(&settings).unwrap();

        ws.drop_file("2025-01-05.jpg", "scan");
        // Let the trigger observe the file; the idle window is longer.
        assert!(timeout(Duration::from_millis(300), trigger.next_batch()).await.is_err());
        std::fs::remove_dir_all(ws.watch_dir()).unwrap();

        let result = timeout(Duration::from_secs(10), trigger.next_batch())
            .await
            .expect("trigger returned");

        assert!(matches!(result, Err(TriggerError::WatchFolderMissing(_))));
    }

    // Scenario: full run loop over a live folder, stopped from outside.
    // Expected Outcome: the dropped scan is uploaded and the loop stops
    // cleanly.
    #[traced_test]
    #[tokio::test]
    async fn run_loop_processes_dropped_scan() {
        let ws = Workspace::new();
        let settings = ws.settings(&[]);
        let cancel = CancellationToken::new();
        let orchestrator = factory::create_orchestrator(&settings, cancel.clone()).unwrap();
        let trigger = factory::create_trigger(&settings).unwrap();
        let mut handle = orchestrator.handle();

        let run = orchestrator.run(trigger);
        let drive = async {
            assert!(handle.wait_for(OrchestratorState::Watching).await);
            ws.drop_file("2025-01-05.jpg", "scan");
            timeout(Duration::from_secs(10), async {
                while ws.uploads().is_empty() {
                    sleep(Duration::from_millis(50)).await;
                }
            })
            .await
            .expect("scan uploaded");
            cancel.cancel();
        };
        let (result, _) = tokio::join!(run, drive);

        result.unwrap();
        assert_eq!(handle.state(), OrchestratorState::Stopped);
        assert_eq!(ws.uploads(), vec!["2025-01-05.jpg.json create"]);
    }

    // Scenario: the one-shot path with nothing eligible in the folder.
    // Expected Outcome: no batch is formed.
    #[test]
    fn scan_batch_is_empty_without_eligible_files() {
        let ws = Workspace::new();
        ws.drop_file("notes.txt", "not a scan");
        let settings = ws.settings(&[]);

        assert!(factory::scan_batch(&settings).is_none());
    }
}
