//! Keyed rate limiter
//!
//! Buckets are created lazily per `(key, limit)` on first request. The table
//! lock is only held to look a bucket up; refill and consume then run under
//! that bucket's own lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{KeyLimit, RateLimiterConfig};
use crate::error::{GovernorError, Result};
use crate::ratelimit::{Admission, RateLimitInfo, RateLimitStrategy};
use crate::stats::{LimiterStats, StatsRecorder};

type SharedState = Arc<Mutex<Box<dyn Admission>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    key: String,
    capacity: u32,
    window: Duration,
}

// == Rate Limiter ==
/// Per-key admission control with a pluggable strategy.
///
/// Checks never wait for capacity: they answer immediately.
pub struct RateLimiter {
    strategy: RateLimitStrategy,
    default_limit: KeyLimit,
    window: Duration,
    idle_ttl: Duration,
    overrides: RwLock<HashMap<String, KeyLimit>>,
    buckets: Mutex<HashMap<BucketKey, SharedState>>,
    stats: StatsRecorder,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("strategy", &self.strategy)
            .field("default_limit", &self.default_limit)
            .field("window", &self.window)
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            strategy: config.strategy,
            default_limit: config.default_limit(),
            window: config.window_duration(),
            idle_ttl: config.idle_ttl_duration(),
            overrides: RwLock::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
            stats: StatsRecorder::new(),
        })
    }

    /// Token bucket limiter with the given capacity and refill rate per key.
    pub fn token_bucket(capacity: u32, refill_rate: f64) -> Result<Self> {
        Self::new(&RateLimiterConfig::token_bucket(capacity, refill_rate))
    }

    // == Admission ==
    /// Consumes one permit for `key` under its default limit.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.try_acquire(key, None, 1)
    }

    /// Consumes one permit for `key` under an explicit capacity.
    pub fn is_allowed_with(&self, key: &str, limit: u32) -> bool {
        self.try_acquire(key, Some(limit), 1)
    }

    /// Consumes one permit for `key` with `limit` requests per `window`.
    ///
    /// The window sizes the sliding window directly; for token buckets it
    /// sets the refill rate to `limit / window`. A zero window falls back to
    /// the configured one.
    pub fn is_allowed_within(&self, key: &str, limit: Option<u32>, window: Duration) -> bool {
        self.try_acquire_within(key, limit, Some(window), 1)
    }

    /// Consumes `tokens` permits at once, all or nothing.
    pub fn try_acquire(&self, key: &str, limit: Option<u32>, tokens: u32) -> bool {
        self.try_acquire_within(key, limit, None, tokens)
    }

    /// [`try_acquire`](Self::try_acquire) with an optional per-call window.
    pub fn try_acquire_within(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
        tokens: u32,
    ) -> bool {
        let state = self.state_for(key, limit, window);
        let allowed = state.lock().try_acquire(Instant::now(), tokens);

        if allowed {
            self.stats.record_admitted();
        } else {
            self.stats.record_throttled();
            debug!(key, tokens, "Rate limit exceeded");
        }
        allowed
    }

    /// Like [`is_allowed`](Self::is_allowed) but reports refusal as an error.
    ///
    /// # Errors
    /// `RateLimitExceeded` with the time until the next permit.
    pub fn check(&self, key: &str) -> Result<()> {
        self.check_with(key, None)
    }

    pub fn check_with(&self, key: &str, limit: Option<u32>) -> Result<()> {
        if self.try_acquire(key, limit, 1) {
            return Ok(());
        }
        let info = self.info(key, limit);
        Err(GovernorError::RateLimitExceeded {
            key: key.to_string(),
            limit: info.limit,
            retry_after: info.retry_after,
        })
    }

    /// Current status for `key` without consuming a permit.
    pub fn info(&self, key: &str, limit: Option<u32>) -> RateLimitInfo {
        self.info_within(key, limit, None)
    }

    pub fn info_within(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> RateLimitInfo {
        let state = self.state_for(key, limit, window);
        let info = state.lock().info(Instant::now());
        info
    }

    // == Guarded Execution ==
    /// Runs `work` only if `key` is admitted.
    ///
    /// # Errors
    /// `RateLimitExceeded` without running `work`.
    pub fn execute<F, T>(&self, key: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.check(key)?;
        Ok(work())
    }

    /// Async form of [`execute`](Self::execute): the future is only created
    /// once the key is admitted.
    pub async fn execute_async<F, Fut, T>(&self, key: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.check(key)?;
        Ok(work().await)
    }

    // == Management ==
    /// Restores every bucket of `key` to full capacity.
    pub fn reset(&self, key: &str) {
        let now = Instant::now();
        let buckets = self.buckets.lock();
        for (bucket_key, state) in buckets.iter() {
            if bucket_key.key == key {
                state.lock().reset(now);
            }
        }
        debug!(key, "Rate limit reset");
    }

    /// Overrides the default limit for one key.
    ///
    /// Existing buckets for the key are dropped so the next request starts a
    /// fresh, full bucket with the new shape.
    pub fn set_key_limit(&self, key: &str, limit: KeyLimit) -> Result<()> {
        limit.validate()?;
        self.overrides.write().insert(key.to_string(), limit);
        self.buckets.lock().retain(|bucket_key, _| bucket_key.key != key);
        Ok(())
    }

    /// Drops buckets idle for longer than `max_idle` that have also refilled
    /// completely. Returns how many.
    ///
    /// A dropped bucket is recreated full on the next request, so only full
    /// ones can go without changing any admission decision.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, state| {
            // Still held by a caller that looked it up before this sweep
            if Arc::strong_count(state) > 1 {
                return true;
            }
            let state = state.lock();
            let idle = now.saturating_duration_since(state.last_activity()) > max_idle;
            !(idle && state.is_full(now))
        });
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        self.strategy
    }

    pub fn default_limit(&self) -> KeyLimit {
        self.default_limit
    }

    /// Idle lifetime configured for background bucket cleanup.
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn stats(&self) -> LimiterStats {
        self.stats.limiter_snapshot(self.bucket_count())
    }

    // == Internals ==
    fn resolve(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> (KeyLimit, Duration) {
        let base = self
            .overrides
            .read()
            .get(key)
            .copied()
            .unwrap_or(self.default_limit);
        let mut resolved = match limit {
            Some(capacity) => KeyLimit { capacity, ..base },
            None => base,
        };

        match window.filter(|window| !window.is_zero()) {
            Some(window) => {
                if self.strategy == RateLimitStrategy::TokenBucket {
                    resolved.refill_rate = resolved.capacity as f64 / window.as_secs_f64();
                }
                (resolved, window)
            }
            None => (resolved, self.window),
        }
    }

    fn state_for(&self, key: &str, limit: Option<u32>, window: Option<Duration>) -> SharedState {
        let (limit, window) = self.resolve(key, limit, window);
        let bucket_key = BucketKey {
            key: key.to_string(),
            capacity: limit.capacity,
            window,
        };

        let mut buckets = self.buckets.lock();
        buckets
            .entry(bucket_key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(self.strategy.build(limit, window, Instant::now())))
            })
            .clone()
    }
}
