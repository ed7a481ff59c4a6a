//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming query strings and JSON bodies. Values are
//! sent as the raw request body, so there is no DTO for them.

use std::time::Duration;

use serde::Deserialize;

/// Query parameters for `PUT /cache/:key`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutParams {
    /// Optional TTL in milliseconds (uses the configured default if absent)
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl PutParams {
    /// Validates the parameters
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.ttl_ms == Some(0) {
            return Some("ttl_ms must be greater than zero".to_string());
        }
        None
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Request body for `POST /invalidate`
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Exact key, `prefix*`, or a glob using `*` and `?`
    pub pattern: String,
}

impl InvalidateRequest {
    pub fn validate(&self) -> Option<String> {
        if self.pattern.is_empty() {
            return Some("Pattern cannot be empty".to_string());
        }
        None
    }
}
