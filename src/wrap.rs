//! Higher-order wrappers
//!
//! Each function takes a unit of work and returns a guarded unit of work.
//! Nothing is registered globally; the caller decides which limiter guards
//! which function by passing it in.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cache::BoundedCache;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// Guards `work` with a fixed rate-limit key.
///
/// The returned closure fails with `RateLimitExceeded` instead of running
/// `work` when the key is throttled.
pub fn rate_limited<F, T>(
    limiter: Arc<RateLimiter>,
    key: impl Into<String>,
    work: F,
) -> impl Fn() -> Result<T>
where
    F: Fn() -> T,
{
    let key = key.into();
    move || limiter.execute(&key, &work)
}

/// Guards `work` with a key derived from its argument, e.g. one bucket per
/// persona id.
pub fn rate_limited_by<A, K, F, T>(
    limiter: Arc<RateLimiter>,
    key_fn: K,
    work: F,
) -> impl Fn(A) -> Result<T>
where
    K: Fn(&A) -> String,
    F: Fn(A) -> T,
{
    move |arg| {
        let key = key_fn(&arg);
        limiter.check(&key)?;
        Ok(work(arg))
    }
}

// == Memoized ==
/// Async `work` whose results are cached under a key derived from the
/// argument. Built by [`memoized`].
pub struct Memoized<V, K, F> {
    cache: BoundedCache<V>,
    key_fn: K,
    ttl: Option<Duration>,
    work: F,
}

/// Caches the results of `work` in `cache`, keyed by `key_fn(&arg)`.
///
/// Each call goes through [`BoundedCache::get_or_compute_with_ttl`], so
/// concurrent calls for the same key run `work` once and failures are not
/// cached. `ttl = None` stores results without expiry.
pub fn memoized<A, V, K, F, Fut, E>(
    cache: BoundedCache<V>,
    key_fn: K,
    ttl: Option<Duration>,
    work: F,
) -> Memoized<V, K, F>
where
    V: Clone + Send + Sync + 'static,
    K: Fn(&A) -> String,
    F: Fn(A) -> Fut,
    Fut: Future<Output = std::result::Result<V, E>>,
    E: Into<anyhow::Error>,
{
    Memoized {
        cache,
        key_fn,
        ttl,
        work,
    }
}

impl<V, K, F> Memoized<V, K, F>
where
    V: Clone + Send + Sync + 'static,
{
    pub async fn call<A, Fut, E>(&self, arg: A) -> Result<V>
    where
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        let key = (self.key_fn)(&arg);
        self.cache
            .get_or_compute_with_ttl(&key, || (self.work)(arg), self.ttl)
            .await
    }

    /// The cache results are stored in.
    pub fn cache(&self) -> &BoundedCache<V> {
        &self.cache
    }
}

/// Wraps `work` so each call logs its elapsed time at debug level.
pub fn timed<F, T>(label: impl Into<String>, work: F) -> impl Fn() -> T
where
    F: Fn() -> T,
{
    let label = label.into();
    move || {
        let started = Instant::now();
        let output = work();
        debug!(
            label = %label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Timed call finished"
        );
        output
    }
}

/// Awaits `future`, logging its elapsed time at debug level.
pub async fn timed_future<Fut>(label: &str, future: Fut) -> Fut::Output
where
    Fut: Future,
{
    let started = Instant::now();
    let output = future.await;
    debug!(
        label,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Timed future finished"
    );
    output
}
