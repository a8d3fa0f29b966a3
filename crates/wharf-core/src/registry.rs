//! Orchestration service tying the storage primitives together into the
//! operations the HTTP API binds to: push/pull for images and charts, cache
//! administration, and scan-gate administration.

use std::sync::Arc;

use bytes::Bytes;

use wharf_db::Database;
use wharf_storage::validate::{is_digest_reference, validate_digest, validate_reference, validate_repository_name};
use wharf_storage::{BlobStore, ByteStream, PathResolver};

use crate::chart::ChartStore;
use crate::error::CoreError;
use crate::eviction::EvictionEngine;
use crate::journal::{Journal, JournalState};
use crate::manifest::ManifestIndex;
use crate::proxy_cache::ProxyCache;
use crate::scan::{ScanGate, ScanGatePolicy};
use crate::upstream::UpstreamManager;

pub struct RegistryService {
    paths: PathResolver,
    pub blobs: Arc<BlobStore>,
    pub manifests: Arc<ManifestIndex>,
    pub charts: Arc<ChartStore>,
    pub journal: Arc<Journal>,
    pub scan_gate: Arc<ScanGate>,
    pub proxy_cache: Arc<ProxyCache>,
    pub eviction: Arc<EvictionEngine>,
    pub upstreams: Arc<UpstreamManager>,
}

impl RegistryService {
    pub async fn new(
        paths: PathResolver,
        db: Database,
        max_cache_size: i64,
        scan_policy: ScanGatePolicy,
    ) -> Result<Self, CoreError> {
        paths.ensure_layout().await?;

        let blobs = Arc::new(BlobStore::new(paths.clone()));
        let manifests = Arc::new(ManifestIndex::new(paths.clone()));
        let charts = Arc::new(ChartStore::new(paths.clone()));
        let journal = Arc::new(Journal::load(paths.clone(), max_cache_size).await?);
        let scan_gate = Arc::new(ScanGate::new(journal.clone(), db.clone(), scan_policy));
        let upstreams = Arc::new(UpstreamManager::load(db).await?);
        let eviction = Arc::new(EvictionEngine::new(journal.clone(), blobs.clone(), manifests.clone()));
        let proxy_cache = Arc::new(ProxyCache::new(
            paths.clone(),
            journal.clone(),
            blobs.clone(),
            scan_gate.clone(),
            upstreams.clone(),
            eviction.clone(),
        ));

        Ok(Self { paths, blobs, manifests, charts, journal, scan_gate, proxy_cache, eviction, upstreams })
    }

    async fn is_proxied(&self, name: &str) -> bool {
        // A repository is proxied if routing succeeds; `NoUpstream` means
        // it is served from local push state instead.
        self.upstreams.resolve(name).await.is_ok()
    }

    // ---- Blob upload (push path) ----

    pub async fn start_upload(&self) -> Result<String, CoreError> {
        Ok(self.blobs.start_upload().await?)
    }

    pub async fn append_chunk(&self, session_id: &str, offset: u64, data: Bytes) -> Result<u64, CoreError> {
        wharf_storage::validate::validate_uuid(session_id).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        Ok(self.blobs.append_chunk(session_id, offset, data).await?)
    }

    pub async fn commit_upload(&self, session_id: &str, expected_digest: Option<&str>) -> Result<String, CoreError> {
        if let Some(digest) = expected_digest {
            validate_digest(digest).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        }
        Ok(self.blobs.commit(session_id, expected_digest).await?)
    }

    pub async fn abort_upload(&self, session_id: &str) -> Result<(), CoreError> {
        Ok(self.blobs.abort(session_id).await?)
    }

    /// Bytes received so far for an open upload session, used to report
    /// the `Range`/`Location` offset after a chunked `PATCH`.
    pub fn upload_status(&self, session_id: &str) -> Option<u64> {
        self.blobs.bytes_received(session_id)
    }

    // ---- Blob retrieval ----

    pub async fn blob_exists(&self, name: &str, digest: &str) -> Result<bool, CoreError> {
        validate_digest(digest).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        if self.blobs.exists(digest).await? {
            return Ok(true);
        }
        if self.is_proxied(name).await {
            return Ok(self.proxy_cache.pull_blob(name, digest).await.is_ok());
        }
        Ok(false)
    }

    /// Size of a blob already known to exist locally (call after
    /// `blob_exists` / `get_blob_stream` have ensured it is cached).
    pub async fn blob_size(&self, digest: &str) -> Result<u64, CoreError> {
        Ok(self.blobs.size(digest).await?)
    }

    pub async fn get_blob_stream(&self, name: &str, digest: &str) -> Result<ByteStream, CoreError> {
        validate_digest(digest).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        if !self.blobs.exists(digest).await? && self.is_proxied(name).await {
            self.proxy_cache.pull_blob(name, digest).await?;
        }
        Ok(self.blobs.stream(digest).await?)
    }

    // ---- Manifests ----

    pub async fn put_manifest(&self, name: &str, reference: &str, data: Bytes) -> Result<String, CoreError> {
        validate_repository_name(name).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        self.manifests.put(name, reference, data).await
    }

    /// Returns manifest bytes, content type, and digest.
    pub async fn get_manifest(&self, name: &str, reference: &str) -> Result<(Bytes, String, String), CoreError> {
        validate_reference(reference).map_err(|e| CoreError::BadRequest(e.to_string()))?;

        if self.is_proxied(name).await {
            if is_digest_reference(reference) {
                // Proxied repositories only populate the tag-keyed cache;
                // a digest pull against one falls back to the manifest
                // index in case the digest was pushed locally too.
                if let Ok(data) = self.manifests.get_by_digest(name, reference).await {
                    return Ok((data, "application/vnd.oci.image.manifest.v1+json".to_string(), reference.to_string()));
                }
                return Err(CoreError::NotFound(format!("{name}@{reference}")));
            }
            let pulled = self.proxy_cache.pull_manifest(name, reference).await?;
            return Ok((pulled.data, pulled.content_type, pulled.digest));
        }

        let data = if is_digest_reference(reference) {
            self.manifests.get_by_digest(name, reference).await?
        } else {
            self.manifests.get_by_tag(name, reference).await?
        };
        let digest = crate::digest::compute_sha256(&data);
        Ok((data, "application/vnd.oci.image.manifest.v1+json".to_string(), digest))
    }

    pub async fn delete_manifest(&self, name: &str, reference: &str) -> Result<(), CoreError> {
        self.manifests.delete(name, reference).await
    }

    pub async fn list_tags(&self, name: &str) -> Result<Vec<String>, CoreError> {
        self.manifests.list(name).await
    }

    // ---- Charts ----

    pub async fn put_chart(&self, name: &str, version: &str, data: Bytes) -> Result<String, CoreError> {
        self.charts.put(name, version, data).await
    }

    pub async fn get_chart(&self, name: &str, version: &str) -> Result<Bytes, CoreError> {
        self.charts.get(name, version).await
    }

    pub async fn chart_index(&self) -> Result<String, CoreError> {
        self.charts.index_yaml().await
    }

    // ---- Cache administration ----

    pub async fn cache_status(&self) -> JournalState {
        self.journal.snapshot().await
    }

    pub async fn cache_cleanup(&self) -> Result<usize, CoreError> {
        self.eviction.run().await
    }

    pub async fn purge_cache_entry(&self, name: &str, tag: &str) -> Result<(), CoreError> {
        let entry = self
            .journal
            .remove_item(name, tag)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("{name}:{tag}")))?;

        if !self.manifests.is_digest_referenced(&entry.digest).await?
            && !self.journal.blob_refcounts().await.contains_key(&entry.digest)
        {
            self.blobs.delete(&entry.digest).await?;
        }
        Ok(())
    }

    pub async fn purge_cache(&self) -> Result<usize, CoreError> {
        let items = self.journal.snapshot().await.items;
        let mut count = 0;
        for item in items {
            self.purge_cache_entry(&item.name, &item.tag).await?;
            count += 1;
        }
        Ok(count)
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }
}
