//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

use super::lru::LruKey;

// == Cache Entry ==
/// A stored value plus the expiry instant and sequence numbers that drive
/// LRU ordering.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Expiration instant, None = no time-based expiry
    pub expires_at: Option<Instant>,
    /// Monotonic sequence number of the last access
    pub access_seq: u64,
    /// Sequence number assigned at insertion; breaks LRU ties
    pub insert_seq: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry inserted at `now` with sequence number `seq`.
    ///
    /// The TTL is fixed at insertion: reads never extend it. A TTL too large
    /// to represent as an instant means no expiry.
    pub fn new(value: V, ttl: Option<Duration>, now: Instant, seq: u64) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            access_seq: seq,
            insert_seq: seq,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now` reaches its expiration instant.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Touch ==
    /// Records a read. Only recency changes, never the expiry.
    pub fn touch(&mut self, seq: u64) {
        self.access_seq = seq;
    }

    /// Position of this entry in the LRU order.
    pub fn lru_key(&self) -> LruKey {
        LruKey {
            access_seq: self.access_seq,
            insert_seq: self.insert_seq,
        }
    }
}
