//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine and its HTTP front-end.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in either tier (HTTP layer only; the engine returns `None`)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key rejected by validation
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single value is larger than the whole memory byte budget
    #[error("Value of {size} bytes exceeds the memory budget of {limit} bytes")]
    ValueTooLarge { size: u64, limit: u64 },

    /// A durable write did not complete
    #[error("Durable write failed for key '{key}': {source}")]
    DurableWriteFailed {
        key: String,
        #[source]
        source: io::Error,
    },

    /// A durable record failed its integrity check
    #[error("Corrupt entry for key '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    /// The disk directory could not be opened or prepared
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// The engine has been shut down
    #[error("Cache engine is shut down")]
    Closed,
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidKey(_) | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::ValueTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::InvalidConfig(_)
            | CacheError::DurableWriteFailed { .. }
            | CacheError::CorruptEntry { .. }
            | CacheError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
