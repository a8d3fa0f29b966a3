//! Eviction Engine: keeps the Journal's `totalSize` under its configured
//! ceiling by removing the least-recently-accessed proxy-cached entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{info, warn};

use wharf_storage::BlobStore;

use crate::error::CoreError;
use crate::journal::{Journal, ScanStatus};
use crate::manifest::ManifestIndex;

/// Fraction of `maxSize` eviction reduces to, once triggered.
pub const LOW_WATERMARK: f64 = 0.9;

/// Window after a scan decision's `decidedAt` during which an `approved`
/// digest is protected from eviction even if it is otherwise the oldest.
pub const APPROVAL_GRACE: chrono::Duration = chrono::Duration::minutes(5);

pub struct EvictionEngine {
    journal: Arc<Journal>,
    blobs: Arc<BlobStore>,
    manifests: Arc<ManifestIndex>,
    running: AtomicBool,
}

impl EvictionEngine {
    pub fn new(journal: Arc<Journal>, blobs: Arc<BlobStore>, manifests: Arc<ManifestIndex>) -> Self {
        Self {
            journal,
            blobs,
            manifests,
            running: AtomicBool::new(false),
        }
    }

    /// Run eviction if `totalSize > maxSize`. Single-flight: a concurrent
    /// call while one is already running is a no-op.
    pub async fn maybe_evict(&self) -> Result<usize, CoreError> {
        let total = self.journal.total_size().await;
        let max = self.journal.max_size().await;
        if total <= max {
            return Ok(0);
        }
        self.run().await
    }

    /// Force a run regardless of current size, used by the periodic
    /// maintenance task so a quiet cache still converges.
    pub async fn run(&self) -> Result<usize, CoreError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(0);
        }
        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self) -> Result<usize, CoreError> {
        let max = self.journal.max_size().await;
        let target = (max as f64 * LOW_WATERMARK) as i64;

        let protected = self.protected_digests().await;
        let candidates = self.journal.evict_candidates(target, &protected).await;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut removed_count = 0;
        for entry in &candidates {
            self.journal.remove_item(&entry.name, &entry.tag).await?;
            removed_count += 1;
        }

        let refcounts = self.journal.blob_refcounts().await;
        let mut digests: Vec<String> = candidates.iter().map(|e| e.digest.clone()).collect();
        digests.sort();
        digests.dedup();

        for digest in digests {
            if refcounts.contains_key(&digest) {
                continue;
            }
            if self.manifests.is_digest_referenced(&digest).await? {
                continue;
            }
            match self.blobs.delete(&digest).await {
                Ok(true) => info!(digest = %digest, "evicted blob"),
                Ok(false) => {}
                Err(e) => warn!(digest = %digest, error = %e, "failed to delete evicted blob"),
            }
        }

        info!(removed = removed_count, "eviction run complete");
        Ok(removed_count)
    }

    /// Digests protected from eviction by a recent `approved` scan decision.
    async fn protected_digests(&self) -> Vec<String> {
        let now = Utc::now();
        self.journal
            .list_decisions()
            .await
            .into_iter()
            .filter(|d| d.status == ScanStatus::Approved)
            .filter(|d| d.decided_at.is_some_and(|at| now - at < APPROVAL_GRACE))
            .map(|d| d.digest)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::CachedImageEntry;
    use wharf_storage::PathResolver;

    async fn harness(max_size: i64) -> (tempfile::TempDir, EvictionEngine, Arc<Journal>, Arc<BlobStore>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        paths.ensure_layout().await.unwrap();
        let journal = Arc::new(Journal::load(paths.clone(), max_size).await.unwrap());
        let blobs = Arc::new(BlobStore::new(paths.clone()));
        let manifests = Arc::new(ManifestIndex::new(paths));
        let engine = EvictionEngine::new(journal.clone(), blobs.clone(), manifests);
        (dir, engine, journal, blobs)
    }

    fn entry(name: &str, digest: &str, size: i64, age_minutes: i64) -> CachedImageEntry {
        let accessed = Utc::now() - chrono::Duration::minutes(age_minutes);
        CachedImageEntry {
            name: name.to_string(),
            tag: "latest".to_string(),
            digest: digest.to_string(),
            size,
            cached_at: accessed,
            last_accessed: accessed,
            source_registry: "upstream".to_string(),
            original_ref: format!("{name}:latest"),
        }
    }

    #[tokio::test]
    async fn evicts_oldest_and_deletes_unreferenced_blob() {
        let (_dir, engine, journal, blobs) = harness(150).await;
        let digest_a = blobs.write(bytes::Bytes::from_static(b"aaaa")).await.unwrap();
        let digest_b = blobs.write(bytes::Bytes::from_static(b"bbbb")).await.unwrap();

        journal.put_item(entry("old/repo", &digest_a, 100, 60)).await.unwrap();
        journal.put_item(entry("new/repo", &digest_b, 100, 1)).await.unwrap();

        let removed = engine.maybe_evict().await.unwrap();
        assert_eq!(removed, 1);
        assert!(journal.find("old/repo", "latest").await.is_none());
        assert!(!blobs.exists(&digest_a).await.unwrap());
        assert!(blobs.exists(&digest_b).await.unwrap());
    }

    #[tokio::test]
    async fn below_ceiling_is_a_no_op() {
        let (_dir, engine, journal, blobs) = harness(10_000).await;
        let digest = blobs.write(bytes::Bytes::from_static(b"small")).await.unwrap();
        journal.put_item(entry("a/repo", &digest, 10, 10)).await.unwrap();

        let removed = engine.maybe_evict().await.unwrap();
        assert_eq!(removed, 0);
    }
}
