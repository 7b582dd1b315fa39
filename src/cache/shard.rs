//! Cache Shard Module
//!
//! One independently locked slice of the cache: a HashMap of entries plus an
//! LRU index and an expiry index. All methods take `now` and a sequence
//! number from the caller so the shard itself stays clock-free.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::{CacheEntry, LruKey, LruTracker};

// == Lookup ==
/// Result of reading a key from a shard.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<V> {
    Hit(V),
    Missing,
    /// The key was present but its TTL had elapsed; it has been removed.
    Expired,
}

// == Insert Outcome ==
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// False when an existing key was overwritten
    pub is_new: bool,
    /// The overwritten entry had already expired
    pub replaced_expired: bool,
}

// == Shard ==
/// Capacity is enforced by the owning cache across all shards, so a shard
/// never evicts on its own.
#[derive(Debug)]
pub struct Shard<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lru: LruTracker,
    /// Entries with a TTL ordered by expiry, keyed by (expires_at, insert_seq)
    expiries: BTreeMap<(Instant, u64), String>,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Shard<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            expiries: BTreeMap::new(),
        }
    }

    // == Get ==
    /// Reads a key, refreshing its recency on a hit.
    ///
    /// An expired entry is removed on the spot and reported as `Expired`.
    pub fn get(&mut self, key: &str, now: Instant, seq: u64) -> Lookup<V>
    where
        V: Clone,
    {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Lookup::Missing,
        };

        if expired {
            self.remove(key);
            return Lookup::Expired;
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                let from = entry.lru_key();
                entry.touch(seq);
                self.lru.touch(from, entry.lru_key());
                Lookup::Hit(entry.value.clone())
            }
            None => Lookup::Missing,
        }
    }

    // == Insert ==
    /// Inserts or overwrites a key. Never evicts.
    pub fn insert(
        &mut self,
        key: String,
        value: V,
        ttl: Option<Duration>,
        now: Instant,
        seq: u64,
    ) -> InsertOutcome {
        let replaced = self.remove(&key);
        let outcome = InsertOutcome {
            is_new: replaced.is_none(),
            replaced_expired: replaced.is_some_and(|old| old.is_expired(now)),
        };

        let entry = CacheEntry::new(value, ttl, now, seq);
        self.lru.insert(entry.lru_key(), key.clone());
        if let Some(expires_at) = entry.expires_at {
            self.expiries
                .insert((expires_at, entry.insert_seq), key.clone());
        }
        self.entries.insert(key, entry);

        outcome
    }

    /// True if the key has an entry, live or not yet reclaimed.
    pub fn holds(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Evict ==
    /// LRU position of this shard's least recently used entry.
    pub fn oldest(&self) -> Option<LruKey> {
        self.lru.oldest()
    }

    /// Removes the least recently used entry, returning its key.
    pub fn evict_lru(&mut self) -> Option<String> {
        let key = self.lru.evict_oldest()?;
        if let Some(entry) = self.entries.remove(&key) {
            if let Some(expires_at) = entry.expires_at {
                self.expiries.remove(&(expires_at, entry.insert_seq));
            }
        }
        Some(key)
    }

    // == Remove ==
    /// Removes a key and its index positions.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(entry.lru_key());
        if let Some(expires_at) = entry.expires_at {
            self.expiries.remove(&(expires_at, entry.insert_seq));
        }
        Some(entry)
    }

    // == Sweep Expired ==
    /// Removes up to `limit` expired entries, earliest expiry first.
    pub fn sweep_expired(&mut self, now: Instant, limit: usize) -> usize {
        let mut removed = 0;
        while removed < limit {
            match self.expiries.first_key_value() {
                Some((&(expires_at, _), _)) if expires_at <= now => {}
                _ => break,
            }
            let Some((_, key)) = self.expiries.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.lru.remove(entry.lru_key());
                removed += 1;
            }
        }
        removed
    }

    // == Remove Matching ==
    /// Removes every key matching the glob pattern.
    pub fn remove_matching(&mut self, pattern: &glob::Pattern) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    /// True if the key holds a live entry. Does not touch recency.
    pub fn contains(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Drops every entry, returning how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.expiries.clear();
        count
    }
}
