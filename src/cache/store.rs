//! Cache Store Module
//!
//! Main cache engine: sharded HashMap storage with LRU eviction, TTL
//! expiration and single-flight population on miss.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::flight::{Flight, FlightFollower, FlightRegistry, Outcome};
use crate::cache::shard::{Lookup, Shard};
use crate::cache::LruKey;
use crate::config::CacheConfig;
use crate::error::{GovernorError, Result};
use crate::stats::{CacheStats, StatsRecorder};

// == Bounded Cache ==
/// Fixed-capacity key/value cache with per-entry TTL, LRU eviction and
/// at-most-once compute on miss.
///
/// `BoundedCache` is a cheap handle: clones share the same entry table,
/// statistics and in-flight registry. Pass it to collaborators instead of
/// reaching for a global.
pub struct BoundedCache<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    shards: Vec<RwLock<Shard<V>>>,
    hasher: RandomState,
    flights: FlightRegistry<V>,
    stats: StatsRecorder,
    /// Monotonic access counter driving LRU order
    sequence: AtomicU64,
    /// Entries across all shards; a slot is reserved here before a new key
    /// is inserted, so it never exceeds `capacity`
    entries: AtomicUsize,
    capacity: usize,
    default_ttl: Option<Duration>,
    cleanup_interval: Duration,
    cleanup_batch_size: usize,
    compute_wait_timeout: Option<Duration>,
}

impl<V> Clone for BoundedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.inner.capacity)
            .field("shards", &self.inner.shards.len())
            .field("entries", &self.len())
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}

impl<V> BoundedCache<V> {
    // == Accessors ==
    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.inner.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.inner.default_ttl
    }

    /// Interval the cleanup scheduler should run at.
    pub fn cleanup_interval(&self) -> Duration {
        self.inner.cleanup_interval
    }

    /// Number of keys with a compute currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Returns current cache statistics without blocking writers.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.cache_snapshot(self.len(), self.inner.capacity)
    }
}

impl<V> BoundedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache from validated configuration.
    ///
    /// # Errors
    /// `CapacityConfig` if the capacity is zero or smaller than the shard
    /// count, `InvalidConfig` for other unusable parameters.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate()?;

        let shards = (0..config.shards)
            .map(|_| RwLock::new(Shard::new()))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                shards,
                hasher: RandomState::new(),
                flights: FlightRegistry::new(),
                stats: StatsRecorder::new(),
                sequence: AtomicU64::new(0),
                entries: AtomicUsize::new(0),
                capacity: config.capacity,
                default_ttl: config.default_ttl_duration(),
                cleanup_interval: config.cleanup_interval_duration(),
                cleanup_batch_size: config.cleanup_batch_size,
                compute_wait_timeout: config.compute_wait_timeout_duration(),
            }),
        })
    }

    /// Single-shard cache with the given capacity and no default TTL.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(&CacheConfig::with_capacity(capacity))
    }

    // == Get ==
    /// Returns the live value for `key`, refreshing its recency.
    ///
    /// An expired entry is removed and reported as absent.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.lookup(key, true).await
    }

    // == Put ==
    /// Inserts or overwrites `key` using the default TTL.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        self.put_with_ttl(key, value, self.inner.default_ttl).await;
    }

    /// Inserts or overwrites `key`; `ttl = None` means no time-based expiry.
    ///
    /// A new key arriving at a full cache evicts exactly one entry, the least
    /// recently used across the whole cache. Overwrites never evict; an
    /// overwrite of an expired entry counts as an expiration.
    pub async fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let shard = self.shard_for(&key);

        loop {
            let mut guard = shard.write().await;

            let evicted = if guard.holds(&key) || self.reserve_slot() {
                None
            } else if self.inner.shards.len() == 1 {
                // The only shard holds every entry, so evict in place
                let evicted = guard.evict_lru();
                if evicted.is_none() {
                    self.inner.entries.fetch_add(1, Ordering::Relaxed);
                }
                evicted
            } else {
                drop(guard);
                self.evict_lru().await;
                continue;
            };

            let outcome = guard.insert(key, value, ttl, Instant::now(), self.next_seq());
            drop(guard);

            if outcome.replaced_expired {
                self.inner.stats.record_expirations(1);
            }
            if let Some(evicted) = evicted {
                self.inner.stats.record_eviction();
                debug!(key = %evicted, "Evicted least recently used entry");
            }
            return;
        }
    }

    // == Get Or Compute ==
    /// Returns the cached value or computes it with the default TTL.
    ///
    /// See [`get_or_compute_with_ttl`](Self::get_or_compute_with_ttl).
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        self.get_or_compute_with_ttl(key, compute, self.inner.default_ttl)
            .await
    }

    /// Returns the cached value or computes, caches and returns it.
    ///
    /// At most one `compute` runs per key at a time across all callers.
    /// Concurrent callers for the same key wait for it and receive its value
    /// or its error. A failed compute caches nothing, so a later call retries.
    ///
    /// # Errors
    /// `Compute` wrapping the compute function's failure, or `LockTimeout`
    /// if a compute wait timeout is configured and elapses.
    pub async fn get_or_compute_with_ttl<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        if let Some(value) = self.lookup(key, true).await {
            return Ok(value);
        }

        loop {
            match self.inner.flights.join(key) {
                Flight::Follower(follower) => {
                    debug!(key, "Waiting on in-flight compute");
                    match self.wait_on(key, follower).await? {
                        Some(outcome) => return compute_result(key, outcome),
                        None => {
                            // Leader went away; it may have populated the cache first
                            if let Some(value) = self.lookup(key, false).await {
                                return Ok(value);
                            }
                        }
                    }
                }
                Flight::Leader(leader) => {
                    // Another leader may have finished between our miss and join
                    if let Some(value) = self.lookup(key, false).await {
                        leader.complete(Ok(value.clone()));
                        return Ok(value);
                    }

                    return match compute().await {
                        Ok(value) => {
                            self.put_with_ttl(key, value.clone(), ttl).await;
                            leader.complete(Ok(value.clone()));
                            Ok(value)
                        }
                        Err(err) => {
                            let cause = Arc::new(err.into());
                            self.inner.stats.record_compute_error();
                            warn!(key, error = %cause, "Compute failed, nothing cached");
                            leader.complete(Err(cause.clone()));
                            Err(GovernorError::Compute {
                                key: key.to_string(),
                                cause,
                            })
                        }
                    };
                }
            }
        }
    }

    // == Invalidate ==
    /// Removes `key` unconditionally. Returns whether it was present.
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut guard = self.shard_for(key).write().await;
        let removed = guard.remove(key).is_some();
        if removed {
            self.inner.entries.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes every key matching a glob pattern such as `traits:alice:*`.
    ///
    /// # Errors
    /// `InvalidPattern` if the glob cannot be parsed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| GovernorError::InvalidPattern(format!("{}: {}", pattern, e)))?;

        let mut removed = 0;
        for shard in &self.inner.shards {
            let mut guard = shard.write().await;
            let count = guard.remove_matching(&pattern);
            self.inner.entries.fetch_sub(count, Ordering::Relaxed);
            removed += count;
        }

        debug!(pattern = %pattern, removed, "Invalidated keys by pattern");
        Ok(removed)
    }

    /// True if `key` holds a live entry. Leaves stats and recency untouched.
    pub async fn contains(&self, key: &str) -> bool {
        self.shard_for(key)
            .read()
            .await
            .contains(key, Instant::now())
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        for shard in &self.inner.shards {
            let mut guard = shard.write().await;
            let count = guard.clear();
            self.inner.entries.fetch_sub(count, Ordering::Relaxed);
        }
    }

    /// Bulk-inserts entries with the default TTL. Returns how many were written.
    pub async fn warm<I, K>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
    {
        let mut written = 0;
        for (key, value) in items {
            self.put(key, value).await;
            written += 1;
        }
        written
    }

    // == Sweep Expired ==
    /// Removes every expired entry, one bounded batch per shard lock.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let batch = self.inner.cleanup_batch_size;
        let mut removed = 0;

        for shard in &self.inner.shards {
            loop {
                let swept = {
                    let mut guard = shard.write().await;
                    let swept = guard.sweep_expired(Instant::now(), batch);
                    self.inner.entries.fetch_sub(swept, Ordering::Relaxed);
                    swept
                };
                removed += swept;
                if swept < batch {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }

        self.inner.stats.record_expirations(removed as u64);
        removed
    }

    // == Internals ==
    fn shard_for(&self, key: &str) -> &RwLock<Shard<V>> {
        let shards = &self.inner.shards;
        if shards.len() == 1 {
            return &shards[0];
        }
        let index = self.inner.hasher.hash_one(key) as usize % shards.len();
        &shards[index]
    }

    /// Claims room for one new entry if the cache is below capacity.
    fn reserve_slot(&self) -> bool {
        let capacity = self.inner.capacity;
        self.inner
            .entries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < capacity).then_some(count + 1)
            })
            .is_ok()
    }

    /// Evicts the least recently used entry across all shards.
    ///
    /// Shards are scanned one lock at a time, so under concurrent access the
    /// victim is the oldest entry seen during the scan.
    async fn evict_lru(&self) {
        let mut victim: Option<(LruKey, usize)> = None;
        for (index, shard) in self.inner.shards.iter().enumerate() {
            if let Some(at) = shard.read().await.oldest() {
                if victim.map_or(true, |(oldest, _)| at < oldest) {
                    victim = Some((at, index));
                }
            }
        }

        let Some((_, index)) = victim else {
            // A concurrent writer holds the slots we saw as taken
            tokio::task::yield_now().await;
            return;
        };

        let evicted = {
            let mut guard = self.inner.shards[index].write().await;
            let evicted = guard.evict_lru();
            if evicted.is_some() {
                self.inner.entries.fetch_sub(1, Ordering::Relaxed);
            }
            evicted
        };

        if let Some(evicted) = evicted {
            self.inner.stats.record_eviction();
            debug!(key = %evicted, "Evicted least recently used entry");
        }
    }

    fn next_seq(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reads a key. `record` controls hit/miss accounting; lazy expirations
    /// are always counted.
    async fn lookup(&self, key: &str, record: bool) -> Option<V> {
        let lookup = {
            let mut guard = self.shard_for(key).write().await;
            let lookup = guard.get(key, Instant::now(), self.next_seq());
            if matches!(lookup, Lookup::Expired) {
                self.inner.entries.fetch_sub(1, Ordering::Relaxed);
            }
            lookup
        };

        match lookup {
            Lookup::Hit(value) => {
                if record {
                    self.inner.stats.record_hit();
                }
                Some(value)
            }
            Lookup::Missing => {
                if record {
                    self.inner.stats.record_miss();
                }
                None
            }
            Lookup::Expired => {
                if record {
                    self.inner.stats.record_miss();
                }
                self.inner.stats.record_expirations(1);
                debug!(key, "Removed expired entry on read");
                None
            }
        }
    }

    async fn wait_on(
        &self,
        key: &str,
        follower: FlightFollower<V>,
    ) -> Result<Option<Outcome<V>>> {
        match self.inner.compute_wait_timeout {
            Some(limit) => tokio::time::timeout(limit, follower.wait())
                .await
                .map_err(|_| GovernorError::LockTimeout {
                    key: key.to_string(),
                    waited: limit,
                }),
            None => Ok(follower.wait().await),
        }
    }
}

fn compute_result<V>(key: &str, outcome: Outcome<V>) -> Result<V> {
    outcome.map_err(|cause| GovernorError::Compute {
        key: key.to_string(),
        cause,
    })
}
