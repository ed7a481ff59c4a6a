//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::MemoryLimits;
use crate::error::{CacheError, Result};

/// What `put` does when the disk write queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Perform the durable write on the caller's task
    #[default]
    WriteInline,
    /// Wait until the queue has room
    Block,
}

impl FromStr for Backpressure {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "write_inline" => Ok(Backpressure::WriteInline),
            "block" => Ok(Backpressure::Block),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown backpressure policy '{other}', expected 'inline' or 'block'"
            ))),
        }
    }
}

/// Cache engine and server configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries held in memory (None = unbounded)
    pub max_memory_entries: Option<usize>,
    /// Maximum total value bytes held in memory (None = unbounded)
    pub max_memory_bytes: Option<u64>,
    /// Directory owned by the disk tier
    pub disk_directory: PathBuf,
    /// TTL applied when `put` is called without one (None = never expire)
    pub default_ttl: Option<Duration>,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
    /// Number of background disk writers
    pub disk_write_workers: usize,
    /// Bound on queued background writes
    pub disk_write_queue_capacity: usize,
    /// Policy when the write queue is full
    pub backpressure: Backpressure,
    /// Whether the server flushes pending writes on shutdown
    pub flush_on_shutdown: bool,
    /// Attempts per background write before giving up
    pub write_retry_attempts: u32,
    /// First retry delay; doubles on each attempt
    pub write_retry_base_delay: Duration,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_MEMORY_ENTRIES` - Memory entry limit, 0 = unbounded (default: 1000)
    /// - `MAX_MEMORY_BYTES` - Memory byte budget, 0 = unbounded (default: unbounded)
    /// - `DISK_DIRECTORY` - Disk tier directory (default: ./cache)
    /// - `DEFAULT_TTL` - Default TTL in seconds, 0 = none (default: 3600)
    /// - `SWEEP_INTERVAL` - Expiry sweep frequency in seconds (default: 5)
    /// - `DISK_WRITE_WORKERS` - Background writers (default: 4)
    /// - `DISK_WRITE_QUEUE_CAPACITY` - Queued write bound (default: 1024)
    /// - `DISK_WRITE_BACKPRESSURE` - `inline` or `block` (default: inline)
    /// - `FLUSH_ON_SHUTDOWN` - Flush queued writes on shutdown (default: true)
    /// - `WRITE_RETRY_ATTEMPTS` - Attempts per background write (default: 3)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_memory_entries: env_parse::<usize>("MAX_MEMORY_ENTRIES")
                .map(|v| (v > 0).then_some(v))
                .unwrap_or(defaults.max_memory_entries),
            max_memory_bytes: env_parse::<u64>("MAX_MEMORY_BYTES")
                .map(|v| (v > 0).then_some(v))
                .unwrap_or(defaults.max_memory_bytes),
            disk_directory: env::var("DISK_DIRECTORY")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.disk_directory),
            default_ttl: env_parse::<u64>("DEFAULT_TTL")
                .map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
                .unwrap_or(defaults.default_ttl),
            sweep_interval: env_parse::<u64>("SWEEP_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            disk_write_workers: env_parse("DISK_WRITE_WORKERS")
                .unwrap_or(defaults.disk_write_workers),
            disk_write_queue_capacity: env_parse("DISK_WRITE_QUEUE_CAPACITY")
                .unwrap_or(defaults.disk_write_queue_capacity),
            backpressure: env_parse("DISK_WRITE_BACKPRESSURE").unwrap_or(defaults.backpressure),
            flush_on_shutdown: env_parse("FLUSH_ON_SHUTDOWN")
                .unwrap_or(defaults.flush_on_shutdown),
            write_retry_attempts: env_parse("WRITE_RETRY_ATTEMPTS")
                .unwrap_or(defaults.write_retry_attempts),
            write_retry_base_delay: defaults.write_retry_base_delay,
            server_port: env_parse("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    /// Default configuration rooted at `dir`.
    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            disk_directory: dir.into(),
            ..Self::default()
        }
    }

    pub fn max_memory_entries(mut self, max: Option<usize>) -> Self {
        self.max_memory_entries = max;
        self
    }

    pub fn max_memory_bytes(mut self, max: Option<u64>) -> Self {
        self.max_memory_bytes = max;
        self
    }

    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn disk_write_workers(mut self, workers: usize) -> Self {
        self.disk_write_workers = workers;
        self
    }

    pub fn disk_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.disk_write_queue_capacity = capacity;
        self
    }

    pub fn backpressure(mut self, policy: Backpressure) -> Self {
        self.backpressure = policy;
        self
    }

    /// How often a failing background write is attempted, and the first delay
    /// between attempts.
    pub fn write_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.write_retry_attempts = attempts;
        self.write_retry_base_delay = base_delay;
        self
    }

    /// Memory tier limits derived from this configuration.
    pub fn memory_limits(&self) -> MemoryLimits {
        MemoryLimits {
            max_entries: self.max_memory_entries,
            max_bytes: self.max_memory_bytes,
        }
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CacheError::InvalidConfig(msg.to_string()));

        if self.max_memory_entries == Some(0) {
            return invalid("max_memory_entries must be greater than zero");
        }
        if self.max_memory_bytes == Some(0) {
            return invalid("max_memory_bytes must be greater than zero");
        }
        if self.disk_write_workers == 0 {
            return invalid("disk_write_workers must be greater than zero");
        }
        if self.disk_write_queue_capacity == 0 {
            return invalid("disk_write_queue_capacity must be greater than zero");
        }
        if self.sweep_interval.is_zero() {
            return invalid("sweep_interval must be greater than zero");
        }
        if self.write_retry_attempts == 0 {
            return invalid("write_retry_attempts must be greater than zero");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_memory_entries: Some(1000),
            max_memory_bytes: None,
            disk_directory: PathBuf::from("./cache"),
            default_ttl: Some(Duration::from_secs(3600)),
            sweep_interval: Duration::from_secs(5),
            disk_write_workers: 4,
            disk_write_queue_capacity: 1024,
            backpressure: Backpressure::WriteInline,
            flush_on_shutdown: true,
            write_retry_attempts: 3,
            write_retry_base_delay: Duration::from_millis(50),
            server_port: 3000,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_memory_entries, Some(1000));
        assert_eq!(config.max_memory_bytes, None);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.disk_write_workers, 4);
        assert_eq!(config.backpressure, Backpressure::WriteInline);
        assert!(config.flush_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        env::remove_var("MAX_MEMORY_ENTRIES");
        env::remove_var("MAX_MEMORY_BYTES");
        env::remove_var("DEFAULT_TTL");
        env::remove_var("DISK_WRITE_BACKPRESSURE");

        let config = Config::from_env();
        assert_eq!(config.max_memory_entries, Some(1000));
        assert_eq!(config.max_memory_bytes, None);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.backpressure, Backpressure::WriteInline);
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::with_directory("/tmp/x")
            .max_memory_entries(Some(2))
            .max_memory_bytes(Some(64))
            .default_ttl(None)
            .backpressure(Backpressure::Block);

        assert_eq!(config.disk_directory, PathBuf::from("/tmp/x"));
        assert_eq!(
            config.memory_limits(),
            MemoryLimits {
                max_entries: Some(2),
                max_bytes: Some(64)
            }
        );
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.backpressure, Backpressure::Block);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        assert!(Config::default().max_memory_entries(Some(0)).validate().is_err());
        assert!(Config::default().max_memory_bytes(Some(0)).validate().is_err());
        assert!(Config::default().disk_write_workers(0).validate().is_err());
        assert!(Config::default().disk_write_queue_capacity(0).validate().is_err());
        assert!(Config::default()
            .sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_backpressure_parse() {
        assert_eq!("inline".parse::<Backpressure>().unwrap(), Backpressure::WriteInline);
        assert_eq!(" BLOCK ".parse::<Backpressure>().unwrap(), Backpressure::Block);
        assert!("drop".parse::<Backpressure>().is_err());
    }
}
