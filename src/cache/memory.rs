//! Memory Tier Module
//!
//! Bounded in-process store combining a HashMap with LRU tracking and TTL
//! expiration. The tier itself is not synchronized; the engine wraps it in a
//! single lock so map and recency order always change together.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, LruTracker, StatsCollector};
use crate::error::{CacheError, Result};

// == Limits ==
/// Capacity policy for the memory tier. When both limits are set, eviction
/// continues until both hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Maximum number of entries
    pub max_entries: Option<usize>,
    /// Maximum total size of stored values
    pub max_bytes: Option<u64>,
}

// == Lookup Result ==
/// Outcome of a memory tier read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLookup {
    /// Live entry; recency was updated
    Hit(Bytes),
    /// Entry was present but past its TTL and has been removed
    Expired,
    /// No entry for the key
    Miss,
}

// == Memory Tier ==
#[derive(Debug)]
pub struct MemoryTier {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Capacity policy
    limits: MemoryLimits,
    /// Sum of `size_bytes` over all entries
    used_bytes: u64,
    /// Shared counters
    stats: Arc<StatsCollector>,
}

impl MemoryTier {
    // == Constructor ==
    pub fn new(limits: MemoryLimits, stats: Arc<StatsCollector>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            limits,
            used_bytes: 0,
            stats,
        }
    }

    // == Get ==
    /// Retrieves a value and marks it most recently used.
    ///
    /// Expired entries are removed on the spot and counted as expirations.
    pub fn get(&mut self, key: &str) -> MemoryLookup {
        match self.entries.get_mut(key) {
            None => return MemoryLookup::Miss,
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                let value = entry.value.clone();
                self.lru.touch(key);
                return MemoryLookup::Hit(value);
            }
            Some(_) => {}
        }

        self.remove_entry(key);
        self.stats.record_expirations(1);
        self.publish_usage();
        MemoryLookup::Expired
    }

    // == Put ==
    /// Inserts or replaces an entry, then evicts least recently used entries
    /// until the tier is back within its limits.
    ///
    /// Returns the evicted keys. The inserted key is never evicted by its own
    /// insertion.
    pub fn put(&mut self, entry: CacheEntry) -> Result<Vec<String>> {
        self.check_size(&entry)?;

        let key = entry.key.clone();
        self.remove_entry(&key);
        self.insert(entry);

        let evicted = self.evict_to_fit(&key);
        self.publish_usage();
        Ok(evicted)
    }

    // == Promote ==
    /// Inserts an entry read back from disk, but only if the key is absent.
    ///
    /// Returns whether the entry was inserted.
    pub fn promote(&mut self, entry: CacheEntry) -> Result<bool> {
        if self.entries.contains_key(&entry.key) || entry.is_expired() {
            return Ok(false);
        }
        self.put(entry)?;
        Ok(true)
    }

    // == Delete ==
    /// Removes an entry by key. Absent keys are not an error.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key).is_some();
        if removed {
            self.publish_usage();
        }
        removed
    }

    // == Contains ==
    /// Checks whether a live entry is held, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    // == Scan Keys ==
    /// Produces a snapshot of the currently held keys, filtered lazily by
    /// `predicate`. Scanning never changes recency.
    pub fn scan_keys<F>(&self, predicate: F) -> KeyScan<F>
    where
        F: FnMut(&str) -> bool,
    {
        let snapshot: Vec<String> = self.entries.keys().cloned().collect();
        KeyScan {
            keys: snapshot.into_iter(),
            predicate,
        }
    }

    // == Remove Expired ==
    /// Removes all expired entries and returns their keys.
    pub fn remove_expired(&mut self) -> Vec<String> {
        let now = current_timestamp_ms();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }

        if !expired.is_empty() {
            self.stats.record_expirations(expired.len() as u64);
            self.publish_usage();
        }
        expired
    }

    // == Clear ==
    /// Drops every entry and returns how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.used_bytes = 0;
        self.publish_usage();
        count
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total size of held values.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    // == Internals ==
    fn check_size(&self, entry: &CacheEntry) -> Result<()> {
        match self.limits.max_bytes {
            Some(limit) if entry.size_bytes > limit => Err(CacheError::ValueTooLarge {
                size: entry.size_bytes,
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.used_bytes += entry.size_bytes;
        self.lru.touch(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.used_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn is_over_capacity(&self) -> bool {
        let over_entries = self
            .limits
            .max_entries
            .is_some_and(|max| self.entries.len() > max);
        let over_bytes = self
            .limits
            .max_bytes
            .is_some_and(|max| self.used_bytes > max);
        over_entries || over_bytes
    }

    fn evict_to_fit(&mut self, keep: &str) -> Vec<String> {
        let mut evicted = Vec::new();

        while self.is_over_capacity() {
            let Some(oldest) = self.lru.peek_oldest().cloned() else {
                break;
            };
            if oldest == keep {
                break;
            }
            self.remove_entry(&oldest);
            self.stats.record_eviction();
            debug!(key = %oldest, "Evicted least recently used entry from memory");
            evicted.push(oldest);
        }

        evicted
    }

    fn publish_usage(&self) {
        self.stats
            .set_memory_usage(self.entries.len(), self.used_bytes);
    }
}

// == Key Scan ==
/// Lazy, finite, non-restartable iterator over a snapshot of memory keys.
pub struct KeyScan<F> {
    keys: std::vec::IntoIter<String>,
    predicate: F,
}

impl<F> Iterator for KeyScan<F>
where
    F: FnMut(&str) -> bool,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let predicate = &mut self.predicate;
        self.keys.by_ref().find(|key| predicate(key))
    }
}
