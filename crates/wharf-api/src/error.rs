//! API error types, surfaced in the OCI-shaped envelope
//! `{"errors":[{"code","message","detail"}]}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("core error: {0}")]
    Core(#[from] wharf_core::CoreError),

    #[error("database error: {0}")]
    Database(#[from] wharf_db::DbError),

    #[error("auth error: {0}")]
    Auth(#[from] wharf_auth::AuthError),

    #[error("storage error: {0}")]
    Storage(#[from] wharf_storage::StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", "forbidden".to_string()),
            ApiError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "method not allowed".to_string())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg.clone()),
            ApiError::Core(e) => match e {
                wharf_core::CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                wharf_core::CoreError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
                wharf_core::CoreError::Ambiguous(msg) => (StatusCode::CONFLICT, "AMBIGUOUS", msg.clone()),
                wharf_core::CoreError::Blocked(msg) => (StatusCode::FORBIDDEN, "BLOCKED", msg.clone()),
                wharf_core::CoreError::PendingReview(msg) => {
                    (StatusCode::CONFLICT, "PENDING_REVIEW", msg.clone())
                }
                wharf_core::CoreError::NoUpstream(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                wharf_core::CoreError::Proxy(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM", e.to_string()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string()),
            },
            ApiError::Database(e) => match e {
                wharf_db::DbError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string()),
            },
            ApiError::Auth(e) => {
                let status = match e {
                    wharf_auth::AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
                    _ => StatusCode::UNAUTHORIZED,
                };
                (status, "UNAUTHORIZED", e.to_string())
            }
            ApiError::Storage(e) => match e {
                wharf_storage::StorageError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                wharf_storage::StorageError::InvalidDigest(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone())
                }
                wharf_storage::StorageError::DigestMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, "DIGEST_MISMATCH", e.to_string())
                }
                wharf_storage::StorageError::OutOfOrder { expected, .. } => {
                    (StatusCode::RANGE_NOT_SATISFIABLE, "OUT_OF_ORDER", format!("expected offset {expected}"))
                }
                wharf_storage::StorageError::SessionNotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string()),
            },
        };

        let body = axum::Json(json!({
            "errors": [{
                "code": code,
                "message": message,
                "detail": null
            }]
        }));

        (status, body).into_response()
    }
}
