//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("upload chunk out of order: expected offset {expected}, got {actual}")]
    OutOfOrder { expected: u64, actual: u64 },

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}
