//! Configuration Module
//!
//! Construction parameters for the cache and the rate limiter. The core only
//! ever receives these structs from its caller; `Config::from_env` is a
//! convenience for host processes such as the demo binary.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GovernorError, Result};
use crate::ratelimit::RateLimitStrategy;

// == Cache Config ==
/// Parameters for a [`BoundedCache`](crate::cache::BoundedCache).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries
    pub capacity: usize,
    /// Default TTL in (fractional) seconds; `None` means entries never expire by time
    pub default_ttl: Option<f64>,
    /// Interval in seconds between background sweeps
    pub cleanup_interval: u64,
    /// Maximum entries removed per shard lock acquisition during a sweep
    pub cleanup_batch_size: usize,
    /// Number of independently locked shards (1 = exact global LRU)
    pub shards: usize,
    /// Bound in milliseconds on waiting for another caller's compute
    pub compute_wait_timeout_ms: Option<u64>,
}

impl CacheConfig {
    /// Config with the given capacity and every other field defaulted.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl.map(|d| d.as_secs_f64());
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn compute_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.compute_wait_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn default_ttl_duration(&self) -> Option<Duration> {
        self.default_ttl
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn cleanup_interval_duration(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn compute_wait_timeout_duration(&self) -> Option<Duration> {
        self.compute_wait_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects parameters the cache cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(GovernorError::CapacityConfig(
                "capacity must be a positive integer".to_string(),
            ));
        }
        if self.shards == 0 {
            return Err(GovernorError::InvalidConfig(
                "shard count must be at least 1".to_string(),
            ));
        }
        if self.capacity < self.shards {
            return Err(GovernorError::CapacityConfig(format!(
                "capacity {} cannot be split across {} shards",
                self.capacity, self.shards
            )));
        }
        if let Some(ttl) = self.default_ttl {
            if !(ttl.is_finite() && ttl > 0.0) {
                return Err(GovernorError::InvalidConfig(format!(
                    "default TTL must be a positive number of seconds, got {}",
                    ttl
                )));
            }
        }
        if self.cleanup_interval == 0 {
            return Err(GovernorError::InvalidConfig(
                "cleanup interval must be at least 1 second".to_string(),
            ));
        }
        if self.cleanup_batch_size == 0 {
            return Err(GovernorError::InvalidConfig(
                "cleanup batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_ttl: None,
            cleanup_interval: 60,
            cleanup_batch_size: 256,
            shards: 1,
            compute_wait_timeout_ms: None,
        }
    }
}

// == Key Limit ==
/// Bucket shape for one key: burst capacity and sustained refill rate.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct KeyLimit {
    /// Maximum tokens (or requests per window for the sliding window)
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl KeyLimit {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(GovernorError::InvalidConfig(
                "rate limit capacity must be positive".to_string(),
            ));
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err(GovernorError::InvalidConfig(format!(
                "refill rate must be a positive number, got {}",
                self.refill_rate
            )));
        }
        Ok(())
    }
}

// == Rate Limiter Config ==
/// Parameters for a [`RateLimiter`](crate::ratelimit::RateLimiter).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub strategy: RateLimitStrategy,
    /// Default tokens per key (requests per window for the sliding window)
    pub capacity: u32,
    /// Window in (fractional) seconds; also derives the default refill rate
    pub window: f64,
    /// Tokens per second; defaults to `capacity / window`
    pub refill_rate: Option<f64>,
    /// Buckets idle for longer than this many seconds are dropped by cleanup
    pub idle_ttl: u64,
}

impl RateLimiterConfig {
    /// Token bucket config with an explicit capacity and refill rate.
    pub fn token_bucket(capacity: u32, refill_rate: f64) -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            capacity,
            refill_rate: Some(refill_rate),
            ..Self::default()
        }
    }

    /// Sliding window config admitting `limit` requests per `window`.
    pub fn sliding_window(limit: u32, window: Duration) -> Self {
        Self {
            strategy: RateLimitStrategy::SlidingWindow,
            capacity: limit,
            window: window.as_secs_f64(),
            refill_rate: None,
            ..Self::default()
        }
    }

    pub fn window_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.window).unwrap_or(Duration::MAX)
    }

    pub fn idle_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.idle_ttl)
    }

    /// The refill rate actually applied to default buckets.
    pub fn effective_refill_rate(&self) -> f64 {
        match self.refill_rate {
            Some(rate) => rate,
            None if self.window > 0.0 => self.capacity as f64 / self.window,
            None => 0.0,
        }
    }

    /// The default per-key limit.
    pub fn default_limit(&self) -> KeyLimit {
        KeyLimit::new(self.capacity, self.effective_refill_rate())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.window.is_finite() && self.window > 0.0) {
            return Err(GovernorError::InvalidConfig(format!(
                "rate limit window must be a positive number of seconds, got {}",
                self.window
            )));
        }
        self.default_limit().validate()
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            capacity: 100,
            window: 3600.0,
            refill_rate: None,
            idle_ttl: 3600,
        }
    }
}

// == Config ==
/// Combined configuration for a host process.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub limiter: RateLimiterConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum cache entries (default: 1000)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds, 0 for none (default: none)
    /// - `CACHE_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `CACHE_CLEANUP_BATCH` - Entries removed per lock hold (default: 256)
    /// - `CACHE_SHARDS` - Lock shards (default: 1)
    /// - `CACHE_COMPUTE_WAIT_TIMEOUT_MS` - Bounded compute wait (default: none)
    /// - `LIMITER_STRATEGY` - `token_bucket` or `sliding_window`
    /// - `LIMITER_CAPACITY` - Tokens per key (default: 100)
    /// - `LIMITER_WINDOW` - Window in seconds (default: 3600)
    /// - `LIMITER_REFILL_RATE` - Tokens per second (default: capacity / window)
    /// - `LIMITER_IDLE_TTL` - Idle bucket lifetime in seconds (default: 3600)
    ///
    /// Unparseable values fall back to their defaults; call `validate` on the
    /// result before use.
    pub fn from_env() -> Self {
        let cache_defaults = CacheConfig::default();
        let limiter_defaults = RateLimiterConfig::default();

        let cache = CacheConfig {
            capacity: env_parse("CACHE_CAPACITY").unwrap_or(cache_defaults.capacity),
            default_ttl: env_parse::<f64>("CACHE_DEFAULT_TTL").filter(|ttl| *ttl > 0.0),
            cleanup_interval: env_parse("CACHE_CLEANUP_INTERVAL")
                .unwrap_or(cache_defaults.cleanup_interval),
            cleanup_batch_size: env_parse("CACHE_CLEANUP_BATCH")
                .unwrap_or(cache_defaults.cleanup_batch_size),
            shards: env_parse("CACHE_SHARDS").unwrap_or(cache_defaults.shards),
            compute_wait_timeout_ms: env_parse("CACHE_COMPUTE_WAIT_TIMEOUT_MS"),
        };

        let limiter = RateLimiterConfig {
            strategy: env_parse("LIMITER_STRATEGY").unwrap_or(limiter_defaults.strategy),
            capacity: env_parse("LIMITER_CAPACITY").unwrap_or(limiter_defaults.capacity),
            window: env_parse("LIMITER_WINDOW").unwrap_or(limiter_defaults.window),
            refill_rate: env_parse("LIMITER_REFILL_RATE"),
            idle_ttl: env_parse("LIMITER_IDLE_TTL").unwrap_or(limiter_defaults.idle_ttl),
        };

        Self { cache, limiter }
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.limiter.validate()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
