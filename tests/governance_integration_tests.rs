//! Integration Tests for the Governance Layer
//!
//! Exercises the cache, the rate limiter and the cleanup scheduler together
//! through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use persona_governor::wrap::{rate_limited, rate_limited_by};
use persona_governor::{
    BoundedCache, CacheConfig, CleanupScheduler, GovernorError, KeyLimit, RateLimitStrategy,
    RateLimiter, RateLimiterConfig,
};

// == Helper Functions ==

fn create_test_cache(capacity: usize) -> BoundedCache<String> {
    BoundedCache::with_capacity(capacity).unwrap()
}

async fn slow_analysis(calls: Arc<AtomicUsize>, value: &str) -> anyhow::Result<String> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(value.to_string())
}

// == Cache Examples ==

#[tokio::test]
async fn test_lru_eviction_example() {
    let cache: BoundedCache<i32> = BoundedCache::with_capacity(2).unwrap();

    cache.put("a", 1).await;
    cache.put("b", 2).await;
    assert_eq!(cache.get("a").await, Some(1));
    cache.put("c", 3).await;

    assert_eq!(cache.get("b").await, None);
    assert_eq!(cache.get("a").await, Some(1));
    assert_eq!(cache.get("c").await, Some(3));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_overwrite_at_capacity_never_evicts() {
    let cache = create_test_cache(2);

    cache.put("a", "1".to_string()).await;
    cache.put("b", "2".to_string()).await;
    cache.put("a", "updated".to_string()).await;

    assert_eq!(cache.get("a").await, Some("updated".to_string()));
    assert_eq!(cache.get("b").await, Some("2".to_string()));
    assert_eq!(cache.stats().evictions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_example() {
    let cache = create_test_cache(10);

    cache
        .put_with_ttl("x", "v".to_string(), Some(Duration::from_secs(1)))
        .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(cache.get("x").await, Some("v".to_string()));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(cache.get("x").await, None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reads_do_not_extend_ttl() {
    let cache = create_test_cache(10);

    cache
        .put_with_ttl("x", "v".to_string(), Some(Duration::from_secs(2)))
        .await;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(cache.get("x").await.is_some());
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.get("x").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_default_ttl_applies_to_put() {
    let config = CacheConfig::with_capacity(10).default_ttl(Some(Duration::from_secs(5)));
    let cache: BoundedCache<u8> = BoundedCache::new(&config).unwrap();

    cache.put("defaulted", 1).await;
    cache.put_with_ttl("forever", 2, None).await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(cache.get("defaulted").await, None);
    assert_eq!(cache.get("forever").await, Some(2));
}

#[test]
fn test_zero_capacity_is_rejected() {
    let err = BoundedCache::<String>::with_capacity(0).unwrap_err();
    assert!(matches!(err, GovernorError::CapacityConfig(_)));
}

// == Single-Flight ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_compute() {
    let cache = create_test_cache(100);
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("traits:alice:analysis", || {
                        slow_analysis(calls, "introspective")
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "introspective");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
    assert_eq!(cache.get("traits:alice:analysis").await, Some("introspective".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compute_failure_reaches_every_waiter_and_is_not_cached() {
    let cache = create_test_cache(100);
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("traits:bob:analysis", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<String, _>(anyhow::anyhow!("model offline"))
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("model offline"));
        assert!(err.compute_cause().is_some());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.contains("traits:bob:analysis").await);
    assert_eq!(cache.stats().compute_errors, 1);

    // Guard released: a later call computes again
    let value = cache
        .get_or_compute("traits:bob:analysis", || async {
            Ok::<_, anyhow::Error>("recovered".to_string())
        })
        .await
        .unwrap();
    assert_eq!(value, "recovered");
}

#[tokio::test]
async fn test_cancelled_compute_releases_guard() {
    let cache = create_test_cache(10);

    let stuck = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute("k", || async {
                    std::future::pending::<anyhow::Result<String>>().await
                })
                .await
        })
    };
    while cache.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(cache.in_flight(), 1);

    stuck.abort();
    let _ = stuck.await;
    assert_eq!(cache.in_flight(), 0);

    let value = cache
        .get_or_compute("k", || async { Ok::<_, anyhow::Error>("fresh".to_string()) })
        .await
        .unwrap();
    assert_eq!(value, "fresh");
}

// == Rate Limiter Examples ==

#[tokio::test(start_paused = true)]
async fn test_token_bucket_example() {
    let limiter = RateLimiter::token_bucket(5, 1.0).unwrap();

    for _ in 0..5 {
        assert!(limiter.is_allowed("persona:alice:activate"));
    }
    assert!(!limiter.is_allowed("persona:alice:activate"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(limiter.is_allowed("persona:alice:activate"));
    assert!(!limiter.is_allowed("persona:alice:activate"));

    let stats = limiter.stats();
    assert_eq!(stats.admitted, 6);
    assert_eq!(stats.throttled, 2);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_strategy() {
    let config = RateLimiterConfig::sliding_window(3, Duration::from_secs(10));
    let limiter = RateLimiter::new(&config).unwrap();
    assert_eq!(limiter.strategy(), RateLimitStrategy::SlidingWindow);

    for _ in 0..3 {
        assert!(limiter.is_allowed("respond"));
    }
    assert!(!limiter.is_allowed("respond"));

    let info = limiter.info("respond", None);
    assert_eq!(info.limit, 3);
    assert_eq!(info.remaining, 0);
    assert!(info.retry_after.is_some());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(limiter.is_allowed("respond"));
}

#[test]
fn test_keys_are_independent_and_reset_restores() {
    let limiter = RateLimiter::token_bucket(1, 0.0001).unwrap();

    assert!(limiter.is_allowed("alice"));
    assert!(!limiter.is_allowed("alice"));
    assert!(limiter.is_allowed("bob"));

    limiter.reset("alice");
    assert!(limiter.is_allowed("alice"));
}

#[test]
fn test_per_key_override() {
    let limiter = RateLimiter::token_bucket(1, 0.0001).unwrap();
    limiter
        .set_key_limit("vip", KeyLimit::new(3, 0.0001))
        .unwrap();

    assert!(limiter.is_allowed("vip"));
    assert!(limiter.is_allowed("vip"));
    assert!(limiter.is_allowed("vip"));
    assert!(!limiter.is_allowed("vip"));
}

#[test]
fn test_check_reports_rate_limit_exceeded() {
    let limiter = RateLimiter::token_bucket(1, 1.0).unwrap();
    limiter.check("k").unwrap();

    let err = limiter.check("k").unwrap_err();
    assert!(err.is_rate_limited());
    match err {
        GovernorError::RateLimitExceeded {
            key, retry_after, ..
        } => {
            assert_eq!(key, "k");
            assert!(retry_after.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_never_oversubscribes() {
    let limiter = Arc::new(RateLimiter::token_bucket(50, 0.0001).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                (0..25).filter(|_| limiter.is_allowed("shared")).count()
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        admitted += handle.await.unwrap();
    }
    assert_eq!(admitted, 50);
}

// == Combinators ==

#[test]
fn test_wrapped_work_is_skipped_when_throttled() {
    let limiter = Arc::new(RateLimiter::token_bucket(1, 0.0001).unwrap());
    let runs = Arc::new(AtomicUsize::new(0));

    let activate = {
        let runs = runs.clone();
        rate_limited(limiter, "persona:activate", move || {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(activate().is_ok());
    assert!(activate().is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_limiter_guards_cached_compute() {
    let cache = create_test_cache(10);
    let limiter = Arc::new(RateLimiter::token_bucket(2, 0.0001).unwrap());

    let respond = rate_limited_by(
        limiter,
        |persona: &String| format!("persona:{}:respond", persona),
        |persona: String| persona,
    );

    for expected_ok in [true, true, false] {
        match respond("alice".to_string()) {
            Ok(persona) => {
                assert!(expected_ok);
                let key = format!("traits:{}:analysis", persona);
                let value = cache
                    .get_or_compute(&key, || async { Ok::<_, anyhow::Error>("calm".to_string()) })
                    .await
                    .unwrap();
                assert_eq!(value, "calm");
            }
            Err(e) => {
                assert!(!expected_ok);
                assert!(e.is_rate_limited());
            }
        }
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

// == Cleanup ==

#[tokio::test(start_paused = true)]
async fn test_scheduler_sweeps_without_reads() {
    let config = CacheConfig {
        cleanup_interval: 1,
        ..CacheConfig::with_capacity(100)
    };
    let cache: BoundedCache<u32> = BoundedCache::new(&config).unwrap();
    let limiter = Arc::new(RateLimiter::token_bucket(5, 1.0).unwrap());

    for i in 0..10 {
        cache
            .put_with_ttl(format!("short:{}", i), i, Some(Duration::from_millis(500)))
            .await;
    }
    cache.put_with_ttl("long", 99, None).await;

    let scheduler = CleanupScheduler::start(&cache, Some(limiter));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().expirations, 10);
    assert_eq!(cache.stats().misses, 0);

    scheduler.shutdown();
}

#[tokio::test]
async fn test_pattern_invalidation_and_warm() {
    let cache = create_test_cache(100);

    let warmed = cache
        .warm(vec![
            ("traits:alice:analysis".to_string(), "a".to_string()),
            ("traits:bob:analysis".to_string(), "b".to_string()),
            ("template:greeting".to_string(), "hi".to_string()),
        ])
        .await;
    assert_eq!(warmed, 3);

    assert_eq!(cache.invalidate_pattern("traits:*").await.unwrap(), 2);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("template:greeting").await);

    assert!(matches!(
        cache.invalidate_pattern("[").await,
        Err(GovernorError::InvalidPattern(_))
    ));
}
