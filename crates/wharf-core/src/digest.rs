//! Digest computation shared by the manifest and chart indices.

use sha2::{Digest, Sha256};

/// Compute the `sha256:<hex>` digest of a byte slice.
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
