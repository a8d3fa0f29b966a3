//! Ambient persistence layer: users, upstream configuration, and the
//! activity audit trail, backed by SQLite via sqlx.
//!
//! Content-addressed state — blobs, manifests, cache entries, upload
//! sessions — is deliberately kept out of this crate; it lives on the
//! filesystem under `wharf-storage`/`wharf-core` so the cache can be
//! inspected and repaired without a database.

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::{ActivityLogQuery, Database};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
