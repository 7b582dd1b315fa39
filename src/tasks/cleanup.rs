//! Cleanup Tasks
//!
//! Background tasks that periodically remove expired cache entries and idle
//! rate-limit buckets. Expiry correctness never depends on them: reads
//! expire entries lazily, so a late or missed sweep only retains memory a
//! little longer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::BoundedCache;
use crate::ratelimit::RateLimiter;

/// Spawns a task that sweeps expired entries from `cache` every `interval`.
///
/// Each sweep locks one shard per batch, never the whole table. Abort the
/// returned handle to stop it.
pub fn spawn_cleanup_task<V>(cache: BoundedCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {:?}",
            interval
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.sweep_expired().await;

            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}

/// Spawns a task that drops rate-limit buckets idle for longer than
/// `max_idle`, checking every `interval`.
pub fn spawn_bucket_cleanup_task(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    max_idle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting idle bucket cleanup task with interval of {:?}",
            interval
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = limiter.cleanup_idle(max_idle);

            if removed > 0 {
                info!("Bucket cleanup: removed {} idle buckets", removed);
            } else {
                debug!("Bucket cleanup: no idle buckets found");
            }
        }
    })
}

// == Cleanup Scheduler ==
/// Owns the background cleanup tasks; dropping it stops them.
#[derive(Debug)]
pub struct CleanupScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl CleanupScheduler {
    /// Starts sweeping `cache` at its configured cleanup interval, and, if
    /// given, dropping idle buckets of `limiter` on the same cadence.
    pub fn start<V>(cache: &BoundedCache<V>, limiter: Option<Arc<RateLimiter>>) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let interval = cache.cleanup_interval();
        let mut handles = vec![spawn_cleanup_task(cache.clone(), interval)];

        if let Some(limiter) = limiter {
            let max_idle = limiter.idle_ttl();
            handles.push(spawn_bucket_cleanup_task(limiter, interval, max_idle));
        }

        Self { handles }
    }

    /// True while every task is still running.
    pub fn is_running(&self) -> bool {
        self.handles.iter().all(|handle| !handle.is_finished())
    }

    /// Stops every task.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache: BoundedCache<String> = BoundedCache::with_capacity(100).unwrap();

        cache
            .put_with_ttl("expire_soon", "value".to_string(), Some(Duration::from_secs(1)))
            .await;

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Removed by the sweep, not by a read
        assert_eq!(cache.len(), 0, "Expired entry should have been cleaned up");
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.stats().misses, 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache: BoundedCache<String> = BoundedCache::with_capacity(100).unwrap();

        cache
            .put_with_ttl("long_lived", "value".to_string(), Some(Duration::from_secs(3600)))
            .await;
        cache.put_with_ttl("forever", "value".to_string(), None).await;

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(cache.get("long_lived").await, Some("value".to_string()));
        assert_eq!(cache.get("forever").await, Some("value".to_string()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let cache: BoundedCache<String> = BoundedCache::with_capacity(100).unwrap();

        let handle = spawn_cleanup_task(cache, Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_cleanup_task_drops_idle_buckets() {
        let limiter = Arc::new(RateLimiter::token_bucket(5, 1.0).unwrap());
        limiter.is_allowed("idle");

        let handle =
            spawn_bucket_cleanup_task(limiter.clone(), Duration::from_secs(1), Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(limiter.bucket_count(), 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_uses_cache_interval_and_stops_on_drop() {
        let config = CacheConfig {
            cleanup_interval: 2,
            ..CacheConfig::with_capacity(10)
        };
        let cache: BoundedCache<u32> = BoundedCache::new(&config).unwrap();
        cache.put_with_ttl("k", 1, Some(Duration::from_secs(1))).await;

        let scheduler = CleanupScheduler::start(&cache, None);
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.len(), 1, "No sweep before the first interval");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(cache.len(), 0);

        scheduler.shutdown();
    }
}
