use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        compact_if_due(&engine, threshold).await;
    }
}

/// One compaction check. Returns whether the log was rewritten.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            tracing::info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use crate::slot::Slot;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap());
        engine.create_resource_type(2, "Mötesrum".into()).await.unwrap();
        engine.create_instance(16, 2, "Mötesrum 1".into(), true).await.unwrap();

        let date = crate::engine::today() + chrono::Days::new(1);
        for _ in 0..5 {
            let b = engine.create_booking(2, date, Slot::H08, "u1".into()).await.unwrap();
            engine.cancel_booking(b.booking_id).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 12);

        assert!(!compact_if_due(&engine, 100).await);
        let before = std::fs::metadata(&path).unwrap().len();
        assert!(compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
    }

    #[tokio::test(start_paused = true)]
    async fn compactor_stops_on_cancel() {
        let path = test_wal_path("cancel.wal");
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_compactor(engine, 1000, cancel.clone()));
        tokio::time::sleep(CHECK_INTERVAL * 3).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
