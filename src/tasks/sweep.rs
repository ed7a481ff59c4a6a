//! Expiry Sweep Task
//!
//! Background task that periodically removes expired entries from both tiers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::EngineCore;

/// Spawns a task that sweeps expired entries every `interval` until `cancel`
/// fires.
///
/// A sweep that overlaps a manual one is skipped rather than queued, so an
/// entry is never counted as expired twice.
pub(crate) fn spawn_sweep_task(
    core: Arc<EngineCore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting expiry sweep task with interval of {:?}", interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = core.sweep_expired().await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }

        debug!("Expiry sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use crate::cache::CacheEngine;
    use crate::config::Config;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweep_task_removes_expired_entries() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_directory(tmp.path()).sweep_interval(Duration::from_millis(50));
        let cache = CacheEngine::open(config).await.unwrap();

        cache
            .put("expire_soon", "value", Some(Duration::from_millis(1)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = cache.stats();
        assert_eq!(stats.current_entries, 0, "Expired entry should have been swept");
        assert!(stats.expirations >= 1);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_sweep_task_preserves_valid_entries() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_directory(tmp.path()).sweep_interval(Duration::from_millis(50));
        let cache = CacheEngine::open(config).await.unwrap();

        cache
            .put("long_lived", "value", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.get("long_lived").await.as_deref(), Some(&b"value"[..]));
        assert_eq!(cache.stats().expirations, 0);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_sweep_task_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_directory(tmp.path()).sweep_interval(Duration::from_millis(10));
        let cache = CacheEngine::open(config).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), cache.shutdown(false))
            .await
            .expect("shutdown should not hang on the sweep task");
    }
}
