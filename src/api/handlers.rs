//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};

use crate::cache::CacheEngine;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, HealthResponse, InvalidateRequest, InvalidateResponse,
    PutParams, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared cache engine
    pub cache: Arc<CacheEngine>,
}

impl AppState {
    /// Creates a new AppState around an opened engine.
    pub fn new(cache: Arc<CacheEngine>) -> Self {
        Self { cache }
    }

    /// Opens an engine from configuration.
    pub async fn from_config(config: &crate::config::Config) -> Result<Self> {
        let cache = CacheEngine::open(config.clone()).await?;
        Ok(Self::new(Arc::new(cache)))
    }
}

/// Handler for PUT /cache/:key
///
/// Stores the raw request body under `key` with an optional `ttl_ms`.
pub async fn put_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<PutParams>,
    body: Bytes,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = params.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let size_bytes = body.len() as u64;
    state.cache.put(&key, body, params.ttl()).await?;

    Ok(Json(SetResponse::new(key, size_bytes)))
}

/// Handler for GET /cache/:key
///
/// Returns the stored bytes as `application/octet-stream`.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    match state.cache.get(&key).await {
        Some(value) => Ok(([(header::CONTENT_TYPE, "application/octet-stream")], value)),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /cache/:key
///
/// Idempotent: deleting a missing key succeeds.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    state.cache.delete(&key).await;
    Json(DeleteResponse::new(key))
}

/// Handler for POST /invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let removed = state.cache.invalidate_pattern(&req.pattern).await;

    Ok(Json(InvalidateResponse {
        pattern: req.pattern,
        removed,
    }))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let removed = state.cache.clear().await;
    Json(ClearResponse { removed })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    if state.cache.is_closed() {
        Json(HealthResponse::shutting_down())
    } else {
        Json(HealthResponse::healthy())
    }
}
