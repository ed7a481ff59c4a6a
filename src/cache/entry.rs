//! Cache Entry Module
//!
//! Defines the unit of cached data shared by both tiers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

// == Cache Entry ==
/// A single cached value together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The key this entry is stored under
    pub key: String,
    /// Opaque payload, never interpreted by the engine
    pub value: Bytes,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Size of the value in bytes, used for capacity accounting
    pub size_bytes: u64,
    /// Number of successful reads
    pub access_count: u64,
    /// Timestamp of the last successful read (Unix milliseconds)
    pub last_accessed_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    ///
    /// # Arguments
    /// * `key` - The key to store the value under
    /// * `value` - The payload
    /// * `ttl` - Optional time-to-live measured from now
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        let now = since_epoch();
        let created_at = now.as_millis() as u64;
        let value = value.into();

        Self {
            key: key.into(),
            size_bytes: value.len() as u64,
            value,
            created_at,
            // Rounded up so an entry never expires before its full TTL elapsed
            expires_at: ttl.map(|ttl| ceil_millis(now.saturating_add(ttl))),
            access_count: 0,
            last_accessed_at: created_at,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time. Entries without a TTL never expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Checks expiry against an explicit clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(expires) if now_ms >= expires)
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = current_timestamp_ms();
    }

}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    since_epoch().as_millis() as u64
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

fn ceil_millis(time: Duration) -> u64 {
    time.as_nanos().div_ceil(1_000_000) as u64
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new("k", "test_value", None);

        assert_eq!(entry.key, "k");
        assert_eq!(entry.value, Bytes::from("test_value"));
        assert_eq!(entry.size_bytes, 10);
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new("k", "test_value", Some(Duration::from_secs(60)));

        let expires_at = entry.expires_at.unwrap();
        assert!(expires_at >= entry.created_at + 60_000);
        assert!(expires_at <= entry.created_at + 60_001);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("k", "v", Some(Duration::from_millis(5)));

        sleep(Duration::from_millis(20));

        assert!(entry.is_expired());
    }

    #[test]
    fn test_touch_updates_access_metadata() {
        let mut entry = CacheEntry::new("k", "v", None);
        entry.touch();
        entry.touch();

        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed_at >= entry.created_at);
    }

    #[test]
    fn test_sub_millisecond_ttl_is_live_when_created() {
        let entry = CacheEntry::new("k", "v", Some(Duration::from_micros(500)));

        assert!(entry.expires_at.unwrap() > entry.created_at);
        assert!(!entry.is_expired_at(entry.created_at));
    }

    #[test]
    fn test_ceil_millis_rounds_up() {
        assert_eq!(ceil_millis(Duration::from_millis(7)), 7);
        assert_eq!(ceil_millis(Duration::from_micros(7_001)), 8);
        assert_eq!(ceil_millis(Duration::from_nanos(1)), 1);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            expires_at: Some(now),
            ..CacheEntry::new("k", "v", None)
        };

        // Expired when current time >= expires_at
        assert!(entry.is_expired_at(now));
        assert!(!entry.is_expired_at(now - 1));
    }
}
