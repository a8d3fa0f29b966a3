//! Content-addressed storage layer: path resolution, input validation, and
//! the blob store itself.

pub mod blob;
pub mod error;
pub mod paths;
pub mod validate;

pub use blob::{BlobStore, ByteStream};
pub use error::StorageError;
pub use paths::PathResolver;
