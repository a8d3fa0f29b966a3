//! Upstream registry management routes.

use std::net::IpAddr;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use tracing::{debug, info};
use url::Url;
use wharf_db::{NewUpstream, NewUpstreamRoute, UpdateUpstream};
use wharf_proxy::{UpstreamClient, UpstreamClientConfig};

use crate::error::ApiError;
use crate::state::AppState;

use super::auth::RequireAdmin;
use super::types::{
    CreateRouteRequest, CreateUpstreamRequest, TestUpstreamRequest, TestUpstreamResponse,
    UpdateUpstreamRequest, UpstreamHealthResponse, UpstreamResponse, UpstreamRouteResponse,
};

const MAX_NAME_LENGTH: usize = 64;
const MAX_DISPLAY_NAME_LENGTH: usize = 128;
const MAX_URL_LENGTH: usize = 2048;
const MAX_PATTERN_LENGTH: usize = 512;
const MAX_WILDCARDS_IN_PATTERN: usize = 10;

/// Blocks requests to localhost, link-local, and private IP ranges so a
/// malicious upstream URL can't be used to probe internal services.
fn validate_upstream_url(url_str: &str) -> Result<(), ApiError> {
    if url_str.len() > MAX_URL_LENGTH {
        return Err(ApiError::BadRequest(format!("URL exceeds maximum length of {MAX_URL_LENGTH} characters")));
    }

    let url = Url::parse(url_str).map_err(|e| ApiError::BadRequest(format!("invalid URL format: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(ApiError::BadRequest(format!("URL scheme '{scheme}' is not allowed"))),
    }

    let host = url.host_str().ok_or_else(|| ApiError::BadRequest("URL must have a host".to_string()))?;

    if host == "localhost" || host == "127.0.0.1" || host == "::1" {
        return Err(ApiError::BadRequest("localhost URLs are not allowed".to_string()));
    }

    let lower_host = host.to_lowercase();
    if lower_host == "metadata" || lower_host == "metadata.google.internal" || lower_host.ends_with(".internal") || lower_host.ends_with(".local")
    {
        return Err(ApiError::BadRequest("internal hostnames are not allowed".to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_or_reserved_ip(&ip) {
            return Err(ApiError::BadRequest("private or reserved IP addresses are not allowed".to_string()));
        }
    }

    Ok(())
}

fn is_private_or_reserved_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

fn validate_upstream_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::BadRequest("upstream name cannot be empty".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::BadRequest(format!("upstream name exceeds maximum length of {MAX_NAME_LENGTH}")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::BadRequest(
            "upstream name must contain only alphanumeric characters, dashes, and underscores".to_string(),
        ));
    }
    Ok(())
}

fn validate_display_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::BadRequest("display name cannot be empty".to_string()));
    }
    if name.len() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ApiError::BadRequest(format!("display name exceeds maximum length of {MAX_DISPLAY_NAME_LENGTH}")));
    }
    Ok(())
}

fn validate_route_pattern(pattern: &str) -> Result<(), ApiError> {
    if pattern.is_empty() {
        return Err(ApiError::BadRequest("route pattern cannot be empty".to_string()));
    }
    if pattern.len() > MAX_PATTERN_LENGTH {
        return Err(ApiError::BadRequest(format!("route pattern exceeds maximum length of {MAX_PATTERN_LENGTH}")));
    }
    if pattern.matches('*').count() > MAX_WILDCARDS_IN_PATTERN {
        return Err(ApiError::BadRequest(format!("route pattern contains too many wildcards (max {MAX_WILDCARDS_IN_PATTERN})")));
    }
    if pattern.contains("..") {
        return Err(ApiError::BadRequest("route pattern cannot contain path traversal sequences".to_string()));
    }
    Ok(())
}

fn upstream_to_response(u: wharf_db::Upstream) -> UpstreamResponse {
    UpstreamResponse {
        id: u.id,
        name: u.name,
        display_name: u.display_name,
        base_url: u.base_url,
        isolated_cache: u.isolated_cache,
        is_default: u.is_default,
        enabled: u.enabled,
        healthy: u.healthy,
        consecutive_failures: u.consecutive_failures,
        has_credentials: u.username.is_some(),
        created_at: u.created_at.to_rfc3339(),
        updated_at: u.updated_at.to_rfc3339(),
    }
}

fn route_to_response(r: wharf_db::UpstreamRoute) -> UpstreamRouteResponse {
    UpstreamRouteResponse { id: r.id, upstream_id: r.upstream_id, pattern: r.pattern, priority: r.priority, created_at: r.created_at.to_rfc3339() }
}

/// GET /api/v1/upstreams (Admin only)
async fn list_upstreams(_admin: RequireAdmin, State(state): State<AppState>) -> Result<Json<Vec<UpstreamResponse>>, ApiError> {
    let upstreams = state.db.list_upstreams().await?;
    Ok(Json(upstreams.into_iter().map(upstream_to_response).collect()))
}

/// POST /api/v1/upstreams (Admin only)
async fn create_upstream(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<CreateUpstreamRequest>,
) -> Result<(StatusCode, Json<UpstreamResponse>), ApiError> {
    debug!(name = %request.name, "creating upstream");

    validate_upstream_name(&request.name)?;
    validate_display_name(&request.display_name)?;
    validate_upstream_url(&request.base_url)?;
    for route in &request.routes {
        validate_route_pattern(&route.pattern)?;
    }

    if state.db.get_upstream_by_name(&request.name).await?.is_some() {
        return Err(ApiError::BadRequest(format!("upstream with name '{}' already exists", request.name)));
    }

    let upstream = state
        .db
        .insert_upstream(NewUpstream {
            name: request.name.clone(),
            display_name: request.display_name,
            base_url: request.base_url,
            username: request.username,
            password: request.password,
            isolated_cache: request.isolated_cache,
            is_default: request.is_default,
        })
        .await?;

    for route in request.routes {
        state
            .db
            .insert_upstream_route(NewUpstreamRoute { upstream_id: upstream.id, pattern: route.pattern, priority: route.priority })
            .await?;
    }

    state.registry.upstreams.reload().await?;
    info!(name = %request.name, id = upstream.id, "created upstream");

    Ok((StatusCode::CREATED, Json(upstream_to_response(upstream))))
}

/// GET /api/v1/upstreams/{id} (Admin only)
async fn get_upstream(_admin: RequireAdmin, State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<UpstreamResponse>, ApiError> {
    let upstream = state.db.get_upstream(id).await?.ok_or_else(|| ApiError::NotFound(format!("upstream: {id}")))?;
    Ok(Json(upstream_to_response(upstream)))
}

/// PUT /api/v1/upstreams/{id} (Admin only)
async fn update_upstream(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateUpstreamRequest>,
) -> Result<Json<UpstreamResponse>, ApiError> {
    debug!(id, "updating upstream");

    if let Some(ref display_name) = request.display_name {
        validate_display_name(display_name)?;
    }
    if let Some(ref url) = request.base_url {
        validate_upstream_url(url)?;
    }

    let update = UpdateUpstream {
        display_name: request.display_name,
        base_url: request.base_url,
        username: request.username.map(Some),
        password: request.password.map(Some),
        isolated_cache: request.isolated_cache,
        is_default: request.is_default,
        enabled: request.enabled,
    };

    let upstream = state.db.update_upstream(id, update).await?.ok_or_else(|| ApiError::NotFound(format!("upstream: {id}")))?;

    state.registry.upstreams.reload().await?;
    info!(id, name = %upstream.name, "updated upstream");

    Ok(Json(upstream_to_response(upstream)))
}

/// DELETE /api/v1/upstreams/{id} (Admin only)
async fn delete_upstream(_admin: RequireAdmin, State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    debug!(id, "deleting upstream");
    let deleted = state.db.delete_upstream(id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("upstream: {id}")));
    }
    state.registry.upstreams.reload().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/upstreams/{id}/routes (Admin only)
async fn list_upstream_routes(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<UpstreamRouteResponse>>, ApiError> {
    state.db.get_upstream(id).await?.ok_or_else(|| ApiError::NotFound(format!("upstream: {id}")))?;
    let routes = state.db.get_upstream_routes(id).await?;
    Ok(Json(routes.into_iter().map(route_to_response).collect()))
}

/// POST /api/v1/upstreams/{id}/routes (Admin only)
async fn add_upstream_route(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CreateRouteRequest>,
) -> Result<(StatusCode, Json<UpstreamRouteResponse>), ApiError> {
    validate_route_pattern(&request.pattern)?;
    state.db.get_upstream(id).await?.ok_or_else(|| ApiError::NotFound(format!("upstream: {id}")))?;

    let route = state
        .db
        .insert_upstream_route(NewUpstreamRoute { upstream_id: id, pattern: request.pattern.clone(), priority: request.priority })
        .await?;

    state.registry.upstreams.reload().await?;
    info!(upstream_id = id, pattern = %request.pattern, "added upstream route");

    Ok((StatusCode::CREATED, Json(route_to_response(route))))
}

/// DELETE /api/v1/upstreams/{upstream_id}/routes/{route_id} (Admin only)
async fn delete_upstream_route(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path((upstream_id, route_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state.db.get_upstream(upstream_id).await?.ok_or_else(|| ApiError::NotFound(format!("upstream: {upstream_id}")))?;
    let deleted = state.db.delete_upstream_route(route_id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("route: {route_id}")));
    }
    state.registry.upstreams.reload().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/upstreams/health (Admin only)
async fn get_all_upstreams_health(_admin: RequireAdmin, State(state): State<AppState>) -> Json<Vec<UpstreamHealthResponse>> {
    let upstreams = state.registry.upstreams.list().await;
    let mut out = Vec::with_capacity(upstreams.len());
    for u in upstreams {
        let healthy = state.registry.upstreams.is_healthy(u.id).await;
        out.push(UpstreamHealthResponse { upstream_id: u.id, name: u.name, healthy });
    }
    Json(out)
}

/// POST /api/v1/upstreams/{id}/check (Admin only) - force an immediate ping
async fn check_upstream_health(_admin: RequireAdmin, State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.upstreams.check_health().await;
    Ok(Json(serde_json::json!({ "checked": true })))
}

/// POST /api/v1/upstreams/test (Admin only) - test a connection without saving
async fn test_upstream_connection(
    _admin: RequireAdmin,
    Json(request): Json<TestUpstreamRequest>,
) -> Result<Json<TestUpstreamResponse>, ApiError> {
    debug!(url = %request.base_url, "testing upstream connection");
    validate_upstream_url(&request.base_url)?;

    let config = UpstreamClientConfig { base_url: request.base_url, username: request.username, password: request.password };

    match UpstreamClient::new(config) {
        Ok(client) => match client.ping().await {
            Ok(true) => Ok(Json(TestUpstreamResponse { success: true, message: "connection successful".to_string() })),
            Ok(false) => Ok(Json(TestUpstreamResponse { success: false, message: "ping returned false".to_string() })),
            Err(e) => Ok(Json(TestUpstreamResponse { success: false, message: format!("connection failed: {e}") })),
        },
        Err(e) => Ok(Json(TestUpstreamResponse { success: false, message: format!("failed to create client: {e}") })),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/upstreams", get(list_upstreams))
        .route("/api/v1/upstreams", post(create_upstream))
        .route("/api/v1/upstreams/health", get(get_all_upstreams_health))
        .route("/api/v1/upstreams/test", post(test_upstream_connection))
        .route("/api/v1/upstreams/{id}", get(get_upstream))
        .route("/api/v1/upstreams/{id}", put(update_upstream))
        .route("/api/v1/upstreams/{id}", delete(delete_upstream))
        .route("/api/v1/upstreams/{id}/check", post(check_upstream_health))
        .route("/api/v1/upstreams/{id}/routes", get(list_upstream_routes))
        .route("/api/v1/upstreams/{id}/routes", post(add_upstream_route))
        .route("/api/v1/upstreams/{upstream_id}/routes/{route_id}", delete(delete_upstream_route))
}
