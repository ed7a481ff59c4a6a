//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /cache/:key` - Store the raw request body (optional `?ttl_ms=`)
//! - `GET /cache/:key` - Retrieve a value as raw bytes
//! - `DELETE /cache/:key` - Delete a key
//! - `POST /invalidate` - Remove every key matching a pattern
//! - `POST /clear` - Remove every key
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
