//! Statistics Module
//!
//! Lock-free counters shared by the cache and the rate limiter, plus the
//! serializable snapshots they hand out.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Stats Recorder ==
/// Monotonic counters updated with relaxed atomic increments.
///
/// Readers never block mutators; a snapshot is a best-effort view where each
/// counter is individually exact.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    compute_errors: AtomicU64,
    admitted: AtomicU64,
    throttled: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `count` expirations (a sweep may remove many at once).
    pub fn record_expirations(&self, count: u64) {
        if count > 0 {
            self.expirations.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_compute_error(&self) {
        self.compute_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshots ==
    /// Cache-facing view of the counters.
    pub fn cache_snapshot(&self, entries: usize, capacity: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            compute_errors: self.compute_errors.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            entries,
            capacity,
        }
    }

    /// Limiter-facing view of the counters.
    pub fn limiter_snapshot(&self, active_buckets: usize) -> LimiterStats {
        LimiterStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            active_buckets,
        }
    }
}

/// Returns hits / (hits + misses), or exactly 0.0 when nothing was requested.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Cache Stats ==
/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a live value
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Entries dropped to make room for a new key
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed (lazily or by the sweeper)
    pub expirations: u64,
    /// Compute functions that returned an error
    pub compute_errors: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Live entries at snapshot time
    pub entries: usize,
    /// Configured capacity
    pub capacity: usize,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

// == Limiter Stats ==
/// Point-in-time rate limiter statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub admitted: u64,
    pub throttled: u64,
    pub active_buckets: usize,
}
