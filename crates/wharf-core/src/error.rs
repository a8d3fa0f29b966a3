//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] wharf_db::DbError),

    #[error("storage error: {0}")]
    Storage(#[from] wharf_storage::StorageError),

    #[error("proxy error: {0}")]
    Proxy(#[from] wharf_proxy::ProxyError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("digest lookup matches more than one candidate: {0}")]
    Ambiguous(String),

    #[error("digest is blocked by scan policy: {0}")]
    Blocked(String),

    #[error("digest is pending vulnerability review: {0}")]
    PendingReview(String),

    #[error("no upstream configured for repository: {0}")]
    NoUpstream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}
