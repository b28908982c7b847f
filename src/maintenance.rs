use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites the WAL once enough appends have
/// accumulated since the last compaction. Spawn one per engine.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::engine::Engine;
    use crate::feed::ChangeFeed;
    use crate::model::Span;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compaction_resets_append_counter() {
        let path = test_wal_path("counter_reset.wal");
        let feed = Arc::new(ChangeFeed::new());
        let engine = Engine::new(path, feed).unwrap();

        let r = engine
            .reserve("u1", "room-1", Span::new(1000, 2000), "")
            .await
            .unwrap();
        engine.confirm(r.id).await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 2);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
