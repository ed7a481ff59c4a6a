//! Tiered Cache - a two-tier (memory + disk) cache engine
//!
//! Provides a bounded LRU memory tier backed by a durable disk tier, with TTL
//! expiration, pattern invalidation and usage statistics, plus an HTTP front-end.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
mod tasks;

pub use api::AppState;
pub use cache::{CacheEngine, CacheStats, KeyPattern};
pub use config::{Backpressure, Config};
pub use error::{CacheError, Result};
