//! Client for communicating with upstream OCI registries: authentication,
//! manifest/blob fetch, and the push path used when mirroring back out.

pub mod client;
pub mod error;

pub use client::{UpstreamClient, UpstreamClientConfig};
pub use error::ProxyError;
