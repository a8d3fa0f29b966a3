//! Scan Gate administration routes: the queue of pending/approved/denied
//! digests backed by `wharf_core::scan::ScanGate`.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use tracing::info;
use wharf_core::{ScanDecision, ScanSummary};

use crate::error::ApiError;
use crate::state::AppState;

use super::auth::RequireAdmin;
use super::types::DecisionRequest;

/// GET /api/v1/scan/summary (Admin only)
async fn summary(_admin: RequireAdmin, State(state): State<AppState>) -> Json<ScanSummary> {
    Json(state.registry.scan_gate.summary().await)
}

/// GET /api/v1/scan/pending (Admin only)
async fn pending(_admin: RequireAdmin, State(state): State<AppState>) -> Json<Vec<ScanDecision>> {
    Json(state.registry.scan_gate.pending().await)
}

/// GET /api/v1/scan/all (Admin only)
async fn all(_admin: RequireAdmin, State(state): State<AppState>) -> Json<Vec<ScanDecision>> {
    Json(state.registry.scan_gate.all().await)
}

/// GET /api/v1/scan/report/{prefix} (Admin only)
async fn report(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<ScanDecision>, ApiError> {
    Ok(Json(state.registry.scan_gate.report(&prefix).await?))
}

/// POST /api/v1/scan/approve/{prefix} (Admin only)
async fn approve(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ScanDecision>, ApiError> {
    let decision = state.registry.scan_gate.report(&prefix).await?;
    let by = request.decided_by.as_deref().unwrap_or("admin").to_string();
    state
        .registry
        .scan_gate
        .approve(&decision.digest, request.reason, &by, request.expires_in_days)
        .await?;
    info!(digest = %decision.digest, by = %by, "approved scan decision");
    Ok(Json(state.registry.scan_gate.report(&decision.digest).await?))
}

/// POST /api/v1/scan/deny/{prefix} (Admin only)
async fn deny(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ScanDecision>, ApiError> {
    let decision = state.registry.scan_gate.report(&prefix).await?;
    let by = request.decided_by.as_deref().unwrap_or("admin").to_string();
    state.registry.scan_gate.deny(&decision.digest, request.reason, &by).await?;
    info!(digest = %decision.digest, by = %by, "denied scan decision");
    Ok(Json(state.registry.scan_gate.report(&decision.digest).await?))
}

/// DELETE /api/v1/scan/decision/{prefix} (Admin only) - drop back to pending
async fn reset_decision(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let decision = state.registry.scan_gate.report(&prefix).await?;
    state.registry.scan_gate.reset(&decision.digest, "admin").await?;
    info!(digest = %decision.digest, "reset scan decision to pending");
    Ok(Json(serde_json::json!({ "reset": true })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/scan/summary", get(summary))
        .route("/api/v1/scan/pending", get(pending))
        .route("/api/v1/scan/all", get(all))
        .route("/api/v1/scan/report/{prefix}", get(report))
        .route("/api/v1/scan/approve/{prefix}", post(approve))
        .route("/api/v1/scan/deny/{prefix}", post(deny))
        .route("/api/v1/scan/decision/{prefix}", delete(reset_decision))
}
