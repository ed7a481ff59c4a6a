//! Cache Engine Module
//!
//! Facade over the memory and disk tiers. Reads probe memory, then the pending
//! write buffer, then disk, promoting disk hits back into memory. Writes commit
//! to memory synchronously and hand the durable write to the background writer.
//!
//! Consistency rests on four pieces of state changed under the memory lock:
//!
//! - `versions`: every `put` takes the next version, so later writes for a key
//!   always carry a larger version than earlier ones.
//! - `pending`: the newest not-yet-durable entry per key. A background write
//!   only lands if its version is still the pending one, so superseded or
//!   deleted writes never reach disk.
//! - `epoch`: bumped by every mutation. A promotion only happens if the epoch
//!   has not moved since the read missed memory, so a slow disk read can never
//!   reinsert a value that was deleted, invalidated or overwritten meanwhile.
//! - `removals_in_flight`: raised while a delete, invalidation or clear is
//!   still clearing the lower tier. No promotion happens while it is non-zero,
//!   and the epoch is bumped again once the lower tier is clean, so a read that
//!   started between the two steps cannot promote the removed value either.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{
    validate_key, CacheEntry, CacheStats, DiskLookup, DiskTier, KeyPattern, MemoryLookup,
    MemoryTier, StatsCollector,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweep_task, DiskWriter, WriteJob};

// == Pending Write ==
#[derive(Debug, Clone)]
struct PendingWrite {
    version: u64,
    entry: CacheEntry,
}

// == Retry Policy ==
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) attempts: u32,
    pub(crate) base_delay: Duration,
}

// == Engine Core ==
/// State shared between the facade and its background tasks.
#[derive(Debug)]
pub(crate) struct EngineCore {
    memory: RwLock<MemoryTier>,
    disk: DiskTier,
    pending: parking_lot::Mutex<HashMap<String, PendingWrite>>,
    stats: Arc<StatsCollector>,
    epoch: AtomicU64,
    removals_in_flight: AtomicUsize,
    versions: AtomicU64,
    sweep_lock: Mutex<()>,
    retry: RetryPolicy,
}

impl EngineCore {
    /// Must be called with the memory lock held.
    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Must be called with the memory lock held. Promotions stay blocked until
    /// the returned guard is dropped.
    fn begin_removal(&self) -> RemovalGuard<'_> {
        self.removals_in_flight.fetch_add(1, Ordering::SeqCst);
        self.bump_epoch();
        RemovalGuard { core: self }
    }

    /// Must be called with the memory lock held.
    fn promotion_allowed(&self, observed_epoch: u64) -> bool {
        self.removals_in_flight.load(Ordering::SeqCst) == 0
            && self.epoch.load(Ordering::SeqCst) == observed_epoch
    }

    /// Must be called with the memory lock held.
    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn pending_entry(&self, key: &str) -> Option<CacheEntry> {
        self.pending.lock().get(key).map(|p| p.entry.clone())
    }

    fn is_pending(&self, key: &str, version: u64) -> bool {
        self.pending
            .lock()
            .get(key)
            .is_some_and(|p| p.version == version)
    }

    /// Forgets the pending write for `key` if it is exactly `version`.
    fn retire_pending(&self, key: &str, version: u64) {
        let mut pending = self.pending.lock();
        if pending.get(key).is_some_and(|p| p.version == version) {
            pending.remove(key);
        }
    }

    /// Forgets the pending write for `key` if it is not newer than `cutoff`.
    fn retire_pending_upto(&self, key: &str, cutoff: u64) -> bool {
        let mut pending = self.pending.lock();
        if pending.get(key).is_some_and(|p| p.version <= cutoff) {
            pending.remove(key);
            return true;
        }
        false
    }

    // == Persist ==
    /// Writes a job to disk once. Superseded or deleted jobs are skipped and
    /// reported as `Ok(false)`.
    pub(crate) async fn persist_once(&self, job: &WriteJob) -> io::Result<bool> {
        let key = job.entry.key.as_str();
        let written = self
            .disk
            .put_if(&job.entry, || self.is_pending(key, job.version))
            .await?;

        if written {
            self.stats.record_disk_write();
        } else {
            debug!(key, version = job.version, "Skipping superseded disk write");
        }
        self.retire_pending(key, job.version);
        Ok(written)
    }

    /// Writes a job with bounded exponential backoff. A write that keeps
    /// failing is logged, counted and forgotten.
    pub(crate) async fn persist_with_retry(&self, job: WriteJob) {
        let mut delay = self.retry.base_delay;

        for attempt in 1..=self.retry.attempts {
            match self.persist_once(&job).await {
                Ok(_) => return,
                Err(e) if attempt < self.retry.attempts => {
                    warn!(
                        key = %job.entry.key,
                        attempt,
                        error = %e,
                        "Disk write failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(
                        key = %job.entry.key,
                        attempts = self.retry.attempts,
                        error = %e,
                        "Disk write failed, giving up"
                    );
                    self.stats.record_disk_write_failure();
                    self.retire_pending(&job.entry.key, job.version);
                }
            }
        }
    }

    /// Records a queued write that will never run.
    pub(crate) fn drop_job(&self, job: WriteJob) {
        warn!(
            key = %job.entry.key,
            version = job.version,
            "Dropping queued disk write on shutdown"
        );
        self.stats.record_dropped_write();
        self.retire_pending(&job.entry.key, job.version);
    }

    pub(crate) fn record_inline_failure(&self, job: &WriteJob) {
        self.stats.record_disk_write_failure();
        self.retire_pending(&job.entry.key, job.version);
    }

    // == Sweep ==
    /// Removes expired entries from both tiers and returns how many keys were
    /// removed. Runs that overlap an in-progress sweep return 0 immediately.
    pub(crate) async fn sweep_expired(&self) -> usize {
        let Ok(_running) = self.sweep_lock.try_lock() else {
            debug!("Expiry sweep already running, skipping");
            return 0;
        };

        let now = current_timestamp_ms();
        let from_memory = self.memory.write().await.remove_expired();
        let counted: HashSet<&str> = from_memory.iter().map(String::as_str).collect();
        let mut removed = from_memory.len();

        for key in self.disk.expired_keys(now) {
            if self.disk.remove_if_expired(&key, now).await && !counted.contains(key.as_str()) {
                self.stats.record_expirations(1);
                removed += 1;
            }
        }

        if let Err(e) = self.disk.persist_index_if_dirty().await {
            warn!(error = %e, "Failed to persist disk index after sweep");
        }
        removed
    }
}

/// Marks a removal that has left memory but may still be clearing disk.
struct RemovalGuard<'a> {
    core: &'a EngineCore,
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        // Epoch first: a read that sees the count fall must also see the bump
        self.core.epoch.fetch_add(1, Ordering::SeqCst);
        self.core.removals_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// == Cache Engine ==
/// Two-tier cache. Construct one per process and share it through an `Arc`.
pub struct CacheEngine {
    core: Arc<EngineCore>,
    writer: DiskWriter,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
    sweep_cancel: CancellationToken,
    closed: AtomicBool,
    default_ttl: Option<Duration>,
}

impl CacheEngine {
    // == Open ==
    /// Opens the disk tier, reconciles its index and starts the background
    /// writer pool and expiry sweep.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsCollector::new());
        let disk = DiskTier::open(&config.disk_directory).await?;

        let core = Arc::new(EngineCore {
            memory: RwLock::new(MemoryTier::new(config.memory_limits(), stats.clone())),
            disk,
            pending: parking_lot::Mutex::new(HashMap::new()),
            stats,
            epoch: AtomicU64::new(0),
            removals_in_flight: AtomicUsize::new(0),
            versions: AtomicU64::new(0),
            sweep_lock: Mutex::new(()),
            retry: RetryPolicy {
                attempts: config.write_retry_attempts,
                base_delay: config.write_retry_base_delay,
            },
        });

        let writer = DiskWriter::start(
            core.clone(),
            config.disk_write_workers,
            config.disk_write_queue_capacity,
            config.backpressure,
        );
        let sweep_cancel = CancellationToken::new();
        let sweeper = spawn_sweep_task(core.clone(), config.sweep_interval, sweep_cancel.clone());

        info!(
            dir = %config.disk_directory.display(),
            max_memory_entries = ?config.max_memory_entries,
            max_memory_bytes = ?config.max_memory_bytes,
            disk_entries = core.disk.len(),
            "Cache engine opened"
        );

        Ok(Self {
            core,
            writer,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
            sweep_cancel,
            closed: AtomicBool::new(false),
            default_ttl: config.default_ttl,
        })
    }

    // == Get ==
    /// Returns the live value for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let core = &self.core;

        let observed_epoch = {
            let mut memory = core.memory.write().await;
            match memory.get(key) {
                MemoryLookup::Hit(value) => {
                    core.stats.record_memory_hit();
                    return Some(value);
                }
                MemoryLookup::Expired => {
                    drop(memory);
                    core.stats.record_memory_miss();
                    core.stats.record_miss();
                    self.spawn_disk_purge(key, false);
                    return None;
                }
                MemoryLookup::Miss => core.stats.record_memory_miss(),
            }
            core.epoch.load(Ordering::SeqCst)
        };

        let lookup = match core.pending_entry(key) {
            Some(entry) if entry.is_expired() => DiskLookup::Expired,
            Some(entry) => DiskLookup::Hit(entry),
            None => core.disk.get(key).await,
        };

        match lookup {
            DiskLookup::Hit(entry) => {
                core.stats.record_disk_hit();
                let value = entry.value.clone();
                self.promote(entry, observed_epoch).await;
                Some(value)
            }
            DiskLookup::Expired => {
                core.stats.record_disk_miss();
                core.stats.record_miss();
                self.spawn_disk_purge(key, true);
                None
            }
            DiskLookup::Miss => {
                core.stats.record_disk_miss();
                core.stats.record_miss();
                None
            }
        }
    }

    // == Put ==
    /// Stores `value` under `key`. `ttl = None` applies the configured default
    /// TTL; a zero TTL is rejected. Returns once the memory tier holds the
    /// value; the durable write follows in the background unless the queue is
    /// full and the inline backpressure policy is active.
    pub async fn put(&self, key: &str, value: impl Into<Bytes>, ttl: Option<Duration>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        validate_key(key)?;
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::InvalidRequest(
                "ttl must be greater than zero".to_string(),
            ));
        }

        let core = &self.core;
        let entry = CacheEntry::new(key, value, ttl.or(self.default_ttl));

        let version = {
            let mut memory = core.memory.write().await;
            memory.put(entry.clone())?;
            core.bump_epoch();
            let version = core.next_version();
            core.pending.lock().insert(
                key.to_string(),
                PendingWrite {
                    version,
                    entry: entry.clone(),
                },
            );
            version
        };
        core.stats.record_put();

        self.writer.submit(WriteJob { entry, version }).await
    }

    // == Delete ==
    /// Removes `key` from both tiers. When this returns no read can observe
    /// the deleted value.
    pub async fn delete(&self, key: &str) {
        let core = &self.core;

        let (cutoff, removal) = {
            let mut memory = core.memory.write().await;
            memory.delete(key);
            let removal = core.begin_removal();
            (core.versions.load(Ordering::Acquire), removal)
        };

        core.disk
            .remove_with(key, || {
                core.retire_pending_upto(key, cutoff);
            })
            .await;
        drop(removal);
        core.stats.record_delete();
    }

    // == Invalidate Pattern ==
    /// Removes every key matching `pattern` (exact, `prefix*` or glob with
    /// `*` and `?`) from both tiers and returns the number of keys removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let pattern = KeyPattern::parse(pattern);
        let removed = self.remove_matching(|key| pattern.matches(key)).await;

        self.core.stats.record_invalidations(removed as u64);
        info!(%pattern, removed, "Invalidated cache keys");
        removed
    }

    // == Clear ==
    /// Removes every entry from both tiers.
    pub async fn clear(&self) -> usize {
        let removed = self.remove_matching(|_| true).await;
        info!(removed, "Cache cleared");
        removed
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.core.stats.snapshot();
        stats.disk_entries = self.core.disk.len() as u64;
        stats
    }

    /// Checks whether `key` is currently held in memory, without touching
    /// recency or statistics.
    pub async fn is_resident(&self, key: &str) -> bool {
        self.core.memory.read().await.contains(key)
    }

    /// Runs an expiry sweep immediately.
    pub async fn sweep_now(&self) -> usize {
        self.core.sweep_expired().await
    }

    // == Shutdown ==
    /// Stops background work. With `flush` every queued write is committed
    /// before returning; without it queued writes are cancelled and each one
    /// is logged. Safe to call more than once.
    pub async fn shutdown(&self, flush: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(flush, "Shutting down cache engine");

        self.sweep_cancel.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiry sweep task ended abnormally");
            }
        }

        self.writer.shutdown(flush).await;

        if let Err(e) = self.core.disk.persist_index().await {
            error!(error = %e, "Failed to persist disk index on shutdown");
        }
        info!("Cache engine shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // == Internals ==
    async fn promote(&self, entry: CacheEntry, observed_epoch: u64) {
        let core = &self.core;
        let mut memory = core.memory.write().await;

        if !core.promotion_allowed(observed_epoch) {
            debug!(key = %entry.key, "Cache mutated during read, skipping promotion");
            return;
        }

        let key = entry.key.clone();
        match memory.promote(entry) {
            Ok(true) => {
                core.stats.record_promotion();
                debug!(key = %key, "Promoted disk entry into memory");
            }
            Ok(false) => {}
            Err(e) => debug!(key = %key, error = %e, "Entry not promoted"),
        }
    }

    /// Removes matching keys from memory, the pending buffer and disk and
    /// returns how many live keys were removed. Already expired entries are
    /// dropped too but not counted.
    async fn remove_matching<F>(&self, matches: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let core = &self.core;

        let (mut removed, cutoff, removal) = {
            let mut memory = core.memory.write().await;
            let keys: Vec<String> = memory.scan_keys(|key| matches(key)).collect();
            let live: HashSet<String> = keys
                .iter()
                .filter(|key| memory.contains(key))
                .cloned()
                .collect();
            for key in &keys {
                memory.delete(key);
            }
            let removal = core.begin_removal();
            (live, core.versions.load(Ordering::Acquire), removal)
        };
        let expired: HashSet<String> = core
            .disk
            .expired_keys(current_timestamp_ms())
            .into_iter()
            .collect();

        let mut targets: HashSet<String> = core
            .pending
            .lock()
            .keys()
            .filter(|key| matches(key))
            .cloned()
            .collect();
        targets.extend(core.disk.matching_keys(|key| matches(key)));
        targets.extend(removed.iter().cloned());

        for key in targets {
            let mut was_pending = false;
            let on_disk = core
                .disk
                .remove_with(&key, || was_pending = core.retire_pending_upto(&key, cutoff))
                .await;
            if was_pending || (on_disk && !expired.contains(&key)) {
                removed.insert(key);
            }
        }
        drop(removal);

        removed.len()
    }

    /// Removes an expired record from disk in the background. The removal is
    /// re-checked under the key's write lock.
    fn spawn_disk_purge(&self, key: &str, count_expiration: bool) {
        let core = Arc::clone(&self.core);
        let key = key.to_string();

        tokio::spawn(async move {
            if core.disk.remove_if_expired(&key, current_timestamp_ms()).await {
                if count_expiration {
                    core.stats.record_expirations(1);
                }
                debug!(key = %key, "Purged expired record from disk");
            }
        });
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            warn!("Cache engine dropped without shutdown, queued writes drain in the background");
            self.sweep_cancel.cancel();
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir, max_entries: usize) -> CacheEngine {
        let config = Config::with_directory(dir.path())
            .max_memory_entries(Some(max_entries))
            .default_ttl(None);
        CacheEngine::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache.put("template:index", "<h1>hi</h1>", None).await.unwrap();

        assert_eq!(
            cache.get("template:index").await,
            Some(Bytes::from("<h1>hi</h1>"))
        );
        assert_eq!(cache.stats().memory_hits, 1);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_get_missing_counts_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        assert_eq!(cache.get("nope").await, None);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.disk_misses, 1);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        assert!(matches!(
            cache.put("", "v", None).await,
            Err(CacheError::InvalidKey(_))
        ));
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_evicted_key_is_served_from_lower_tier_and_promoted() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 2).await;

        cache.put("a", "1", None).await.unwrap();
        cache.put("b", "2", None).await.unwrap();
        cache.put("c", "3", None).await.unwrap();
        assert!(!cache.is_resident("a").await);

        assert_eq!(cache.get("a").await, Some(Bytes::from("1")));
        assert!(cache.is_resident("a").await);

        let stats = cache.stats();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.promotions, 1);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_overwrite_wins_on_disk() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = open(&tmp, 10).await;
            for i in 0..20 {
                cache.put("k", format!("v{i}"), None).await.unwrap();
            }
            cache.shutdown(true).await;
        }

        let cache = open(&tmp, 10).await;
        assert_eq!(cache.get("k").await, Some(Bytes::from("v19")));
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_delete_removes_both_tiers() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache.put("k", "v", None).await.unwrap();
        cache.delete("k").await;
        cache.delete("k").await;

        assert_eq!(cache.get("k").await, None);
        cache.shutdown(true).await;
        assert_eq!(cache.stats().disk_entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache.put("user:1", "a", None).await.unwrap();
        cache.put("user:2", "b", None).await.unwrap();
        cache.put("team:1", "c", None).await.unwrap();

        assert_eq!(cache.invalidate_pattern("user:*").await, 2);
        assert_eq!(cache.get("user:1").await, None);
        assert_eq!(cache.get("user:2").await, None);
        assert_eq!(cache.get("team:1").await, Some(Bytes::from("c")));
        assert_eq!(cache.stats().invalidations, 2);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_invalidate_skips_already_expired_keys() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache
            .put("user:stale", "a", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        cache.put("user:live", "b", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.invalidate_pattern("user:*").await, 1);
        assert_eq!(cache.stats().invalidations, 1);
        assert!(!cache.is_resident("user:stale").await);
        cache.shutdown(true).await;
        assert_eq!(cache.stats().disk_entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_skips_expired_disk_only_keys() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = open(&tmp, 10).await;
            cache
                .put("user:stale", "a", Some(Duration::from_millis(20)))
                .await
                .unwrap();
            cache.put("user:live", "b", None).await.unwrap();
            cache.shutdown(true).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cache = open(&tmp, 10).await;
        assert_eq!(cache.invalidate_pattern("user:*").await, 1);
        assert_eq!(cache.stats().disk_entries, 0);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_invalidate_reaches_evicted_keys() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 1).await;

        cache.put("page:a", "1", None).await.unwrap();
        cache.put("page:b", "2", None).await.unwrap();

        assert_eq!(cache.invalidate_pattern("page:?").await, 2);
        assert_eq!(cache.get("page:a").await, None);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy_and_counted() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache
            .put("k", "v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.get("k").await, None);
        assert!(cache.stats().expirations >= 1);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_sub_millisecond_ttl_is_readable_right_away() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        let mut served = 0;
        for i in 0..20 {
            let key = format!("k{i}");
            cache
                .put(&key, "v", Some(Duration::from_micros(500)))
                .await
                .unwrap();
            if cache.get(&key).await.is_some() {
                served += 1;
            }
        }
        assert!(served > 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k0").await, None);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        assert!(matches!(
            cache.put("k", "v", Some(Duration::ZERO)).await,
            Err(CacheError::InvalidRequest(_))
        ));
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().puts, 0);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_from_both_tiers() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache
            .put("short", "v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        cache.put("long", "v", None).await.unwrap();
        // Let the background writes land
        tokio::time::sleep(Duration::from_millis(100)).await;

        let removed = cache.sweep_now().await;

        assert_eq!(removed, 1);
        assert_eq!(cache.sweep_now().await, 0);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.current_entries, 1);
        assert_eq!(stats.disk_entries, 1);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache.put("a", "1", None).await.unwrap();
        cache.put("b", "2", None).await.unwrap();

        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.stats().invalidations, 0);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_put_after_shutdown_fails() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 10).await;

        cache.shutdown(true).await;
        cache.shutdown(true).await;

        assert!(cache.is_closed());
        assert!(matches!(
            cache.put("k", "v", None).await,
            Err(CacheError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_value_too_large() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_directory(tmp.path()).max_memory_bytes(Some(4));
        let cache = CacheEngine::open(config).await.unwrap();

        let result = cache.put("big", "12345", None).await;

        assert!(matches!(result, Err(CacheError::ValueTooLarge { .. })));
        assert_eq!(cache.get("big").await, None);
        cache.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let tmp = TempDir::new().unwrap();
        let config =
            Config::with_directory(tmp.path()).default_ttl(Some(Duration::from_millis(1)));
        let cache = CacheEngine::open(config).await.unwrap();

        cache.put("k", "v", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.get("k").await, None);
        cache.shutdown(true).await;
    }
}
