//! Persona Governor - resource governance for persona workloads
//!
//! A bounded TTL/LRU cache with single-flight compute on miss, a per-key
//! rate limiter, and the background tasks that keep both tidy.

pub mod cache;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod stats;
pub mod tasks;
pub mod wrap;

pub use cache::BoundedCache;
pub use config::{CacheConfig, Config, KeyLimit, RateLimiterConfig};
pub use error::{GovernorError, Result};
pub use ratelimit::{RateLimitInfo, RateLimitStrategy, RateLimiter};
pub use stats::{CacheStats, LimiterStats, StatsRecorder};
pub use tasks::{spawn_cleanup_task, CleanupScheduler};
