//! Disk Tier Module
//!
//! Durable key-value persistence. Layout under the cache directory:
//!
//! ```text
//! <dir>/index.json              key -> record file, rebuildable
//! <dir>/records/<sha256>.rec    one JSON record per key
//! ```
//!
//! Records are committed by writing a uniquely named temp file, syncing it and
//! renaming it over the final name, so a reader sees either the previous record
//! or the new one. Writes for the same key serialize on a striped async mutex;
//! the index lock is never held across an `.await`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

const RECORDS_DIR: &str = "records";
const INDEX_FILE: &str = "index.json";
const RECORD_EXT: &str = "rec";
const TEMP_MARKER: &str = ".tmp.";
const LOCK_STRIPES: usize = 64;

// == Index Entry ==
/// Location and expiry of one durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Record file name inside `records/`
    pub file: String,
    pub expires_at: Option<u64>,
    pub size_bytes: u64,
}

// == Disk Record ==
/// On-disk representation of an entry.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    #[serde(with = "hex::serde")]
    value: Vec<u8>,
    created_at: u64,
    expires_at: Option<u64>,
    size_bytes: u64,
    /// SHA-256 of `value`, hex encoded
    checksum: String,
}

impl DiskRecord {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            value: entry.value.to_vec(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            size_bytes: entry.size_bytes,
            checksum: sha256_hex(&entry.value),
        }
    }

    /// Verifies the record and converts it back into an entry.
    fn into_entry(self, expected_key: Option<&str>) -> Result<CacheEntry> {
        let corrupt = |reason: String| CacheError::CorruptEntry {
            key: self.key.clone(),
            reason,
        };

        if let Some(expected) = expected_key {
            if expected != self.key {
                return Err(corrupt(format!("record belongs to key '{expected}'")));
            }
        }
        if self.value.len() as u64 != self.size_bytes {
            return Err(corrupt(format!(
                "size mismatch: header says {}, value has {}",
                self.size_bytes,
                self.value.len()
            )));
        }
        if sha256_hex(&self.value) != self.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }

        Ok(CacheEntry {
            key: self.key,
            value: Bytes::from(self.value),
            created_at: self.created_at,
            expires_at: self.expires_at,
            size_bytes: self.size_bytes,
            access_count: 0,
            last_accessed_at: current_timestamp_ms(),
        })
    }
}

// == Lookup Result ==
/// Outcome of a disk tier read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskLookup {
    Hit(CacheEntry),
    /// The record exists but is past its TTL; the caller schedules removal
    Expired,
    Miss,
}

// == Rebuild Report ==
/// What `rebuild_index` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Index entries confirmed by a record file
    pub retained: usize,
    /// Record files added to the index
    pub imported: usize,
    /// Index entries without a record file
    pub dropped: usize,
    /// Unreadable record files deleted
    pub corrupt_removed: usize,
    /// Leftover temp files from interrupted writes
    pub temp_removed: usize,
}

// == Disk Tier ==
#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    records_dir: PathBuf,
    index_path: PathBuf,
    /// Key -> record location
    index: RwLock<HashMap<String, IndexEntry>>,
    /// Per-key write serialization
    stripes: Vec<Mutex<()>>,
    /// Set when the in-memory index differs from `index.json`
    dirty: AtomicBool,
}

impl DiskTier {
    // == Open ==
    /// Opens (creating if needed) a disk tier rooted at `root` and reconciles
    /// its index with the record files actually present.
    #[instrument(skip_all, fields(dir = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let records_dir = root.join(RECORDS_DIR);
        fs::create_dir_all(&records_dir).await?;

        let index_path = root.join(INDEX_FILE);
        let index = load_index(&index_path).await;

        let tier = Self {
            root,
            records_dir,
            index_path,
            index: RwLock::new(index),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            dirty: AtomicBool::new(false),
        };

        let report = tier.rebuild_index().await?;
        info!(
            records = tier.len(),
            imported = report.imported,
            dropped = report.dropped,
            corrupt_removed = report.corrupt_removed,
            temp_removed = report.temp_removed,
            "Disk tier opened"
        );

        Ok(tier)
    }

    // == Rebuild Index ==
    /// Rebuilds the index from the records directory. Every record is read
    /// back, so index metadata always matches the file on disk. Entries with
    /// no backing file are dropped and leftovers of interrupted writes are
    /// deleted. The result is persisted.
    #[instrument(skip(self), fields(dir = %self.root.display()))]
    pub async fn rebuild_index(&self) -> io::Result<RebuildReport> {
        let mut report = RebuildReport {
            temp_removed: remove_temp_files(&self.root).await?,
            ..RebuildReport::default()
        };

        let mut present = HashSet::new();
        let mut dir = fs::read_dir(&self.records_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.contains(TEMP_MARKER) {
                remove_logged(&item.path()).await;
                report.temp_removed += 1;
            } else if name.ends_with(RECORD_EXT) {
                present.insert(name);
            }
        }

        let previous: HashSet<String> = self.index.read().keys().cloned().collect();
        let mut rebuilt = HashMap::with_capacity(present.len());

        for name in present {
            let path = self.records_dir.join(&name);
            match load_entry(&path, None).await {
                Ok(entry) if record_file_name(&entry.key) == name => {
                    if previous.contains(&entry.key) {
                        report.retained += 1;
                    } else {
                        report.imported += 1;
                    }
                    rebuilt.insert(entry.key.clone(), index_entry(&entry, name));
                }
                Ok(entry) => {
                    warn!(file = %name, key = %entry.key, "Record stored under the wrong file name, removing");
                    remove_logged(&path).await;
                    report.corrupt_removed += 1;
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "Unreadable record during rebuild, removing");
                    remove_logged(&path).await;
                    report.corrupt_removed += 1;
                }
            }
        }

        report.dropped = previous
            .iter()
            .filter(|key| !rebuilt.contains_key(*key))
            .count();
        *self.index.write() = rebuilt;

        self.persist_index().await?;
        debug!(?report, "Index rebuilt");
        Ok(report)
    }

    // == Get ==
    /// Reads a record. Corrupt records are removed and reported as a miss; I/O
    /// errors are logged and reported as a miss.
    pub async fn get(&self, key: &str) -> DiskLookup {
        let Some(file) = self.file_for(key) else {
            return DiskLookup::Miss;
        };

        match load_entry(&self.records_dir.join(&file), Some(key)).await {
            Ok(entry) if entry.is_expired() => DiskLookup::Expired,
            Ok(entry) => DiskLookup::Hit(entry),
            Err(CacheError::CorruptEntry { reason, .. }) => {
                warn!(key, %reason, "Corrupt record on disk, removing");
                self.remove_where(key, |loaded| {
                    matches!(loaded, Err(CacheError::CorruptEntry { .. }))
                })
                .await;
                DiskLookup::Miss
            }
            Err(CacheError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, "Record removed while reading");
                DiskLookup::Miss
            }
            Err(e) => {
                warn!(key, error = %e, "Disk read failed, treating as miss");
                DiskLookup::Miss
            }
        }
    }

    // == Put ==
    /// Durably writes an entry.
    pub async fn put(&self, entry: &CacheEntry) -> io::Result<()> {
        self.put_if(entry, || true).await.map(|_| ())
    }

    /// Durably writes an entry if `still_current` holds once the key's write
    /// lock is taken. Returns whether the write happened.
    ///
    /// On error the previous record, if any, is left untouched.
    pub async fn put_if<F>(&self, entry: &CacheEntry, still_current: F) -> io::Result<bool>
    where
        F: FnOnce() -> bool,
    {
        let file = record_file_name(&entry.key);
        let bytes = serde_json::to_vec(&DiskRecord::from_entry(entry))?;

        let _guard = self.stripe(&entry.key).lock().await;
        if !still_current() {
            return Ok(false);
        }

        write_atomic(&self.records_dir.join(&file), &bytes).await?;
        self.index
            .write()
            .insert(entry.key.clone(), index_entry(entry, file));
        self.dirty.store(true, Ordering::Release);
        Ok(true)
    }

    // == Remove ==
    /// Removes a record. Idempotent; I/O failures are logged and leave the
    /// record in place.
    pub async fn remove(&self, key: &str) -> bool {
        self.remove_with(key, || {}).await
    }

    /// Removes a record, running `under_lock` while holding the key's write
    /// lock so callers can retire pending state atomically with the removal.
    pub async fn remove_with<F>(&self, key: &str, under_lock: F) -> bool
    where
        F: FnOnce(),
    {
        let _guard = self.stripe(key).lock().await;
        under_lock();
        self.remove_locked(key).await
    }

    /// Removes a record only if it is still expired at `now_ms` when read
    /// under the key's write lock, so a fresh rewrite is never deleted.
    pub async fn remove_if_expired(&self, key: &str, now_ms: u64) -> bool {
        self.remove_where(key, |loaded| {
            matches!(loaded, Ok(entry) if entry.is_expired_at(now_ms))
        })
        .await
    }

    // == Scans ==
    /// Keys whose indexed expiry is at or before `now_ms`.
    pub fn expired_keys(&self, now_ms: u64) -> Vec<String> {
        self.index
            .read()
            .iter()
            .filter(|(_, entry)| matches!(entry.expires_at, Some(at) if now_ms >= at))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys accepted by `predicate`.
    pub fn matching_keys<F>(&self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        self.index
            .read()
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    // == Persist Index ==
    /// Atomically writes the index file.
    pub async fn persist_index(&self) -> io::Result<()> {
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.index.read().clone();
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Err(e) = write_atomic(&self.index_path, &bytes).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Writes the index file only if it changed since the last write.
    pub async fn persist_index_if_dirty(&self) -> io::Result<bool> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.persist_index().await?;
        Ok(true)
    }

    // == Internals ==
    fn stripe(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn file_for(&self, key: &str) -> Option<String> {
        self.index.read().get(key).map(|entry| entry.file.clone())
    }

    async fn remove_where<F>(&self, key: &str, check: F) -> bool
    where
        F: FnOnce(&Result<CacheEntry>) -> bool,
    {
        let _guard = self.stripe(key).lock().await;
        let Some(file) = self.file_for(key) else {
            return false;
        };

        let loaded = load_entry(&self.records_dir.join(&file), Some(key)).await;
        if !check(&loaded) {
            return false;
        }
        self.remove_locked(key).await
    }

    /// Caller must hold the key's stripe lock.
    async fn remove_locked(&self, key: &str) -> bool {
        let removed = self.index.write().remove(key);
        let Some(entry) = removed else {
            return false;
        };

        match fs::remove_file(self.records_dir.join(&entry.file)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key, error = %e, "Failed to remove record, keeping it indexed");
                self.index.write().insert(key.to_string(), entry);
                return false;
            }
        }

        self.dirty.store(true, Ordering::Release);
        true
    }
}

// == Utility Functions ==
/// Record file name for a key: the SHA-256 of the key keeps arbitrary keys
/// filesystem-safe.
pub fn record_file_name(key: &str) -> String {
    format!("{}.{RECORD_EXT}", sha256_hex(key.as_bytes()))
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn index_entry(entry: &CacheEntry, file: String) -> IndexEntry {
    IndexEntry {
        file,
        expires_at: entry.expires_at,
        size_bytes: entry.size_bytes,
    }
}

async fn load_entry(path: &Path, expected_key: Option<&str>) -> Result<CacheEntry> {
    let bytes = fs::read(path).await?;
    let record: DiskRecord =
        serde_json::from_slice(&bytes).map_err(|e| CacheError::CorruptEntry {
            key: expected_key
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string()),
            reason: e.to_string(),
        })?;
    record.into_entry(expected_key)
}

async fn load_index(path: &Path) -> HashMap<String, IndexEntry> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "Index file unreadable, rebuilding from records");
            HashMap::new()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No index file, rebuilding from records");
            HashMap::new()
        }
        Err(e) => {
            warn!(error = %e, "Failed to read index file, rebuilding from records");
            HashMap::new()
        }
    }
}

/// Writes `bytes` to `path` so that a crash leaves either the old file or the
/// complete new one.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);

    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        remove_logged(&temp).await;
        return Err(e);
    }

    sync_parent_dir(path).await;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}{TEMP_MARKER}{}", Uuid::new_v4()))
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    let synced = async { fs::File::open(parent).await?.sync_all().await }.await;
    if let Err(e) = synced {
        debug!(dir = %parent.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) {}

async fn remove_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(item) = entries.next_entry().await? {
        if item.file_name().to_string_lossy().contains(TEMP_MARKER) {
            remove_logged(&item.path()).await;
            removed += 1;
        }
    }
    Ok(removed)
}

async fn remove_logged(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}
