//! Cache Module
//!
//! Two-tier caching: a bounded LRU memory tier in front of a durable disk
//! tier, with TTL expiration, pattern invalidation and shared statistics.

mod disk;
mod engine;
mod entry;
mod lru;
mod memory;
mod pattern;
mod stats;


// Re-export public types
pub use disk::{record_file_name, DiskLookup, DiskTier, IndexEntry, RebuildReport};
pub use engine::CacheEngine;
pub(crate) use engine::EngineCore;
pub use entry::{current_timestamp_ms, CacheEntry};
pub use lru::LruTracker;
pub use memory::{KeyScan, MemoryLimits, MemoryLookup, MemoryTier};
pub use pattern::KeyPattern;
pub use stats::{CacheStats, StatsCollector};

use crate::error::{CacheError, Result};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 4096;

/// Rejects keys the disk tier cannot address.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
