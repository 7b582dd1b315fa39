//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::BTreeMap;

// == LRU Key ==
/// Ordering key: access sequence first, insertion sequence as tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LruKey {
    pub access_seq: u64,
    pub insert_seq: u64,
}

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Keys are indexed by [`LruKey`]; the smallest key is the least recently
/// used entry. Touching and evicting are O(log n).
#[derive(Debug, Default)]
pub struct LruTracker {
    order: BTreeMap<LruKey, String>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
        }
    }

    // == Insert ==
    /// Starts tracking `key` at position `at`.
    pub fn insert(&mut self, at: LruKey, key: String) {
        self.order.insert(at, key);
    }

    // == Touch ==
    /// Moves a key from position `from` to the more recent position `to`.
    pub fn touch(&mut self, from: LruKey, to: LruKey) {
        if let Some(key) = self.order.remove(&from) {
            self.order.insert(to, key);
        }
    }

    // == Remove ==
    /// Stops tracking whatever sits at position `at`.
    pub fn remove(&mut self, at: LruKey) -> Option<String> {
        self.order.remove(&at)
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        self.order.pop_first().map(|(_, key)| key)
    }

    // == Oldest ==
    /// Position of the least recently used key, without removing it.
    pub fn oldest(&self) -> Option<LruKey> {
        self.order.first_key_value().map(|(at, _)| *at)
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
