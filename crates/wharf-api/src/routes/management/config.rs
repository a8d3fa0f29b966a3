//! Configuration file management routes.
//!
//! There is no generic key/value config table — runtime configuration is a
//! single TOML file (see `wharf-cache`'s `Config`), read and atomically
//! rewritten through this endpoint. Changes take effect on restart.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, put},
};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

use super::auth::RequireAdmin;
use super::types::{ConfigFileResponse, UpdateConfigFileRequest};

const MAX_CONFIG_CONTENT_SIZE: usize = 1024 * 1024;

/// GET /api/v1/config/file (Admin only)
async fn get_config_file(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<ConfigFileResponse>, ApiError> {
    let content = tokio::fs::read_to_string(&state.config_path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read config file: {e}")))?;

    if content.len() > MAX_CONFIG_CONTENT_SIZE {
        return Err(ApiError::Internal("config file exceeds maximum allowed size".to_string()));
    }

    Ok(Json(ConfigFileResponse { content }))
}

/// PUT /api/v1/config/file (Admin only)
async fn update_config_file(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<UpdateConfigFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.content.len() > MAX_CONFIG_CONTENT_SIZE {
        return Err(ApiError::BadRequest(format!(
            "config content exceeds maximum allowed size of {MAX_CONFIG_CONTENT_SIZE} bytes"
        )));
    }

    if request.content.contains("..") {
        warn!("rejecting config update containing path traversal sequence");
        return Err(ApiError::BadRequest("config content looks suspicious".to_string()));
    }

    toml::from_str::<toml::Value>(&request.content)
        .map_err(|e| ApiError::BadRequest(format!("invalid TOML syntax: {e}")))?;

    let tmp = state.config_path.with_extension("toml.tmp");
    tokio::fs::write(&tmp, &request.content)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to write config file: {e}")))?;
    tokio::fs::rename(&tmp, &state.config_path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to replace config file: {e}")))?;

    info!(path = %state.config_path.display(), "config file updated, restart to apply");

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "configuration file updated; restart the server to apply changes"
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/config/file", get(get_config_file))
        .route("/api/v1/config/file", put(update_config_file))
}
