//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache and
//! the rate limiter.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired cache entries at the configured interval
//! - Bucket Cleanup: Drops rate-limit buckets that have gone idle

mod cleanup;

pub use cleanup::{spawn_bucket_cleanup_task, spawn_cleanup_task, CleanupScheduler};
