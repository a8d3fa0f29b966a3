//! Proxy Cache: the pull-through path for repositories routed to an
//! upstream registry.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use wharf_storage::BlobStore;
use wharf_storage::PathResolver;

use crate::error::CoreError;
use crate::eviction::EvictionEngine;
use crate::journal::{CachedImageEntry, Journal};
use crate::scan::{Decision, ScanGate};
use crate::upstream::UpstreamManager;

/// A fetched manifest plus the blobs it named, ready to be committed.
pub struct PulledManifest {
    pub data: Bytes,
    pub content_type: String,
    pub digest: String,
}

/// Coalesces concurrent misses for the same `(source, name, tag)` so only
/// one upstream fetch happens at a time; latecomers wait on the same lock
/// and then re-read what the winner committed.
pub struct ProxyCache {
    paths: PathResolver,
    journal: Arc<Journal>,
    blobs: Arc<BlobStore>,
    scan_gate: Arc<ScanGate>,
    upstreams: Arc<UpstreamManager>,
    eviction: Arc<EvictionEngine>,
    inflight: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProxyCache {
    pub fn new(
        paths: PathResolver,
        journal: Arc<Journal>,
        blobs: Arc<BlobStore>,
        scan_gate: Arc<ScanGate>,
        upstreams: Arc<UpstreamManager>,
        eviction: Arc<EvictionEngine>,
    ) -> Self {
        Self {
            paths,
            journal,
            blobs,
            scan_gate,
            upstreams,
            eviction,
            inflight: SyncMutex::new(HashMap::new()),
        }
    }

    fn fingerprint_lock(&self, fingerprint: &str) -> Arc<AsyncMutex<()>> {
        self.inflight
            .lock()
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Resolve `(name, tag)` through the proxy cache, fetching from
    /// upstream on a miss.
    pub async fn pull_manifest(&self, name: &str, tag: &str) -> Result<PulledManifest, CoreError> {
        if let Some(cached) = self.journal.find(name, tag).await {
            self.admit(&cached.digest).await?;
            self.journal.touch(name, tag).await?;
            let data = self.read_cached_manifest(name, tag).await?;
            debug!(name, tag, "proxy cache hit");
            return Ok(PulledManifest { data, content_type: "application/vnd.oci.image.manifest.v1+json".to_string(), digest: cached.digest });
        }

        let fingerprint = format!("{name}:{tag}");
        let lock = self.fingerprint_lock(&fingerprint);
        let _guard = lock.lock().await;

        // Another task may have filled the cache while we waited for the lock.
        if let Some(cached) = self.journal.find(name, tag).await {
            self.admit(&cached.digest).await?;
            self.journal.touch(name, tag).await?;
            let data = self.read_cached_manifest(name, tag).await?;
            return Ok(PulledManifest { data, content_type: "application/vnd.oci.image.manifest.v1+json".to_string(), digest: cached.digest });
        }

        let pulled = self.fetch_and_commit(name, tag).await?;
        self.inflight.lock().remove(&fingerprint);

        if self.journal.total_size().await > self.journal.max_size().await {
            let eviction = self.eviction.clone();
            tokio::spawn(async move {
                if let Err(e) = eviction.maybe_evict().await {
                    tracing::warn!(error = %e, "background eviction failed");
                }
            });
        }

        Ok(pulled)
    }

    /// Serve a blob referenced by a proxied repository, fetching from
    /// upstream on a miss. Manifests are fetched through [`Self::pull_manifest`]
    /// first in the normal client flow, which prefetches every blob it
    /// references; this covers the case of a direct blob request (e.g. a
    /// resumed layer download) that races ahead of that prefetch.
    pub async fn pull_blob(&self, name: &str, digest: &str) -> Result<Bytes, CoreError> {
        self.admit(digest).await?;

        if self.blobs.exists(digest).await? {
            return Ok(self.blobs.read(digest).await?);
        }

        let lock = self.fingerprint_lock(digest);
        let _guard = lock.lock().await;

        if self.blobs.exists(digest).await? {
            return Ok(self.blobs.read(digest).await?);
        }

        let (_upstream, client) = self.upstreams.resolve(name).await?;
        let (data, _size) = client.get_blob(name, digest).await?;
        self.blobs.write(data.clone()).await?;
        Ok(data)
    }

    async fn admit(&self, digest: &str) -> Result<(), CoreError> {
        match self.scan_gate.decide(digest).await {
            Decision::Approved => Ok(()),
            Decision::Denied => Err(CoreError::Blocked(digest.to_string())),
            Decision::Pending => {
                let result = self.scan_gate.get_result(digest).await;
                if self.scan_gate.admits_pending(result.as_ref()) {
                    Ok(())
                } else {
                    Err(CoreError::PendingReview(digest.to_string()))
                }
            }
        }
    }

    async fn read_cached_manifest(&self, name: &str, tag: &str) -> Result<Bytes, CoreError> {
        let path = self.paths.image_manifest_path(name, tag);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("{name}:{tag}")))
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    async fn fetch_and_commit(&self, name: &str, tag: &str) -> Result<PulledManifest, CoreError> {
        let (upstream, client) = self.upstreams.resolve(name).await?;
        info!(name, tag, upstream = %upstream.name, "proxy cache miss, fetching from upstream");

        let (manifest_bytes, content_type, _upstream_digest) = client.get_manifest(name, tag).await?;
        let digest = crate::digest::compute_sha256(&manifest_bytes);

        self.admit_fresh(&digest).await?;

        for layer_digest in extract_referenced_digests(&manifest_bytes) {
            if self.blobs.exists(&layer_digest).await? {
                continue;
            }
            let (data, _size) = client.get_blob(name, &layer_digest).await?;
            self.blobs.write(data).await?;
        }

        let dir = self.paths.images_dir().join(name).join("manifests");
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.paths.image_manifest_path(name, tag);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &manifest_bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        let size = manifest_bytes.len() as i64;
        let now = Utc::now();
        self.journal
            .put_item(CachedImageEntry {
                name: name.to_string(),
                tag: tag.to_string(),
                digest: digest.clone(),
                size,
                cached_at: now,
                last_accessed: now,
                source_registry: upstream.name.clone(),
                original_ref: format!("{}:{}", name, tag),
            })
            .await?;

        Ok(PulledManifest { data: manifest_bytes, content_type, digest })
    }

    /// A digest that has never been seen before is implicitly `pending` —
    /// no row needs to be created for it to show up via `ScanGate::pending()`,
    /// an external scanner populates the result later via `submit()`.
    async fn admit_fresh(&self, digest: &str) -> Result<(), CoreError> {
        self.admit(digest).await
    }
}

/// Best-effort extraction of `sha256:...`/`sha512:...` digest strings
/// referenced inside a manifest body (config + layers), used to prefetch
/// blobs the manifest depends on. Manifests are small, so a linear scan of
/// the raw bytes is cheap enough to avoid a full OCI manifest schema.
fn extract_referenced_digests(manifest: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(manifest) else {
        return Vec::new();
    };
    let mut digests = Vec::new();
    collect_digests(&value, &mut digests);
    digests.sort();
    digests.dedup();
    digests
}

fn collect_digests(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(d)) = map.get("digest") {
                out.push(d.clone());
            }
            for v in map.values() {
                collect_digests(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_digests(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_digests_from_manifest_layers() {
        let manifest = br#"{
            "schemaVersion": 2,
            "config": {"digest": "sha256:aaa"},
            "layers": [{"digest": "sha256:bbb"}, {"digest": "sha256:ccc"}]
        }"#;
        let digests = extract_referenced_digests(manifest);
        assert_eq!(digests, vec!["sha256:aaa", "sha256:bbb", "sha256:ccc"]);
    }
}
