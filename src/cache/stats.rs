//! Cache Statistics Module
//!
//! Process-wide counters for both tiers. Counters are atomics so every path
//! can update them without coordinating with the data path's locks.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Stats Collector ==
/// Live counters shared by the engine, its tiers and background tasks.
#[derive(Debug, Default)]
pub struct StatsCollector {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    disk_writes: AtomicU64,
    disk_write_failures: AtomicU64,
    dropped_writes: AtomicU64,
    // Gauges, written under the memory tier lock
    current_entries: AtomicU64,
    current_bytes: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A read that returned nothing.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write_failure(&self) {
        self.disk_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
    }

    // == Gauges ==
    /// Publishes the memory tier's current size.
    pub fn set_memory_usage(&self, entries: usize, bytes: u64) {
        self.current_entries.store(entries as u64, Ordering::Relaxed);
        self.current_bytes.store(bytes, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Returns a point-in-time copy of every counter.
    ///
    /// `disk_entries` is left at zero; the engine fills it from the disk index.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            disk_write_failures: self.disk_write_failures.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
            current_entries: self.current_entries.load(Ordering::Relaxed),
            current_bytes: self.current_bytes.load(Ordering::Relaxed),
            disk_entries: 0,
        }
    }
}

// == Cache Stats ==
/// Immutable view of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads served from either tier
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    /// Disk hits copied back into memory
    pub promotions: u64,
    /// Entries dropped from memory by the LRU policy
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Keys removed by pattern invalidation
    pub invalidations: u64,
    pub puts: u64,
    pub deletes: u64,
    /// Durable writes that committed
    pub disk_writes: u64,
    /// Background writes that failed after every retry
    pub disk_write_failures: u64,
    /// Queued writes cancelled by a non-flushing shutdown
    pub dropped_writes: u64,
    /// Entries currently held in memory
    pub current_entries: u64,
    /// Value bytes currently held in memory
    pub current_bytes: u64,
    /// Records currently indexed on disk
    pub disk_entries: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
