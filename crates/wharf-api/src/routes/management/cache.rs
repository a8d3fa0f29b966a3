//! Cache management routes: inspect and administer the proxy cache's
//! Journal-backed entries.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

use super::auth::{RequireAdmin, RequireAuth};
use super::types::{CacheEntryResponse, CacheStatsResponse};

/// GET /api/v1/cache/stats (Authenticated)
async fn cache_stats(_auth: RequireAuth, State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let snapshot = state.registry.cache_status().await;

    Json(CacheStatsResponse {
        total_size: snapshot.total_size,
        max_size: snapshot.max_size,
        item_count: snapshot.item_count,
        updated_at: snapshot.updated_at.to_rfc3339(),
        items: snapshot
            .items
            .into_iter()
            .map(|i| CacheEntryResponse {
                name: i.name,
                tag: i.tag,
                digest: i.digest,
                size: i.size,
                cached_at: i.cached_at.to_rfc3339(),
                last_accessed: i.last_accessed.to_rfc3339(),
                source_registry: i.source_registry,
            })
            .collect(),
    })
}

/// DELETE /api/v1/cache (Admin only) - purge every cached entry
async fn clear_cache(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("purging entire proxy cache");
    let count = state.registry.purge_cache().await?;
    Ok(Json(serde_json::json!({ "purged": count })))
}

/// DELETE /api/v1/cache/{name}/{tag} (Admin only)
async fn purge_entry(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path((name, tag)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(%name, %tag, "purging cache entry");
    state.registry.purge_cache_entry(&name, &tag).await?;
    Ok(Json(serde_json::json!({ "purged": true })))
}

/// POST /api/v1/cache/cleanup (Admin only) - run eviction now
async fn cleanup_cache(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("running cache eviction");
    let count = state.registry.cache_cleanup().await?;
    Ok(Json(serde_json::json!({ "evicted": count })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/cache/stats", get(cache_stats))
        .route("/api/v1/cache", delete(clear_cache))
        .route("/api/v1/cache/cleanup", post(cleanup_cache))
        .route("/api/v1/cache/{name}/{tag}", delete(purge_entry))
}
