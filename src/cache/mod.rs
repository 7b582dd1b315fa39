//! Cache Module
//!
//! Provides in-memory caching with TTL expiration, LRU eviction and
//! single-flight compute on miss.

mod entry;
mod flight;
mod lru;
mod shard;
mod store;


pub(crate) use entry::CacheEntry;
pub(crate) use lru::{LruKey, LruTracker};
pub use store::BoundedCache;
