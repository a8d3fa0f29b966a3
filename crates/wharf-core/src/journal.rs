//! Cache Metadata Journal: durable on-disk state for the proxy cache and
//! the vulnerability Scan Gate, which share a single `state.json` file.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use wharf_storage::PathResolver;

use crate::error::CoreError;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedImageEntry {
    pub name: String,
    pub tag: String,
    pub digest: String,
    pub size: i64,
    #[serde(rename = "cachedAt")]
    pub cached_at: DateTime<Utc>,
    #[serde(rename = "lastAccessed")]
    pub last_accessed: DateTime<Utc>,
    #[serde(rename = "sourceRegistry")]
    pub source_registry: String,
    #[serde(rename = "originalRef")]
    pub original_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    #[serde(rename = "scannedAt")]
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDecision {
    pub digest: String,
    #[serde(rename = "imageName")]
    pub image_name: String,
    pub tag: String,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "decidedBy", skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(rename = "decidedAt", skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "scanResult", skip_serializing_if = "Option::is_none")]
    pub scan_result: Option<ScanResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalState {
    pub version: u32,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "totalSize")]
    pub total_size: i64,
    #[serde(rename = "maxSize")]
    pub max_size: i64,
    #[serde(rename = "itemCount")]
    pub item_count: usize,
    pub items: Vec<CachedImageEntry>,
    pub decisions: Vec<ScanDecision>,

    /// Fields the journal doesn't understand yet but must round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JournalState {
    fn empty(max_size: i64) -> Self {
        Self {
            version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            total_size: 0,
            max_size,
            item_count: 0,
            items: Vec::new(),
            decisions: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    fn recompute(&mut self) {
        self.total_size = self.items.iter().map(|i| i.size).sum();
        self.item_count = self.items.len();
        self.updated_at = Utc::now();
    }
}

/// Owns the in-memory authoritative copy of `state.json` and serializes
/// writes through a single async mutex. Readers take a snapshot under a
/// read-lock; nothing here is held across upstream network I/O.
pub struct Journal {
    paths: PathResolver,
    state: RwLock<JournalState>,
    write_lock: Mutex<()>,
}

impl Journal {
    /// Load `state.json` if present, validating referenced blobs exist and
    /// dropping entries whose blob is missing (self-healing). Creates an
    /// empty journal if the file does not exist.
    pub async fn load(paths: PathResolver, max_size: i64) -> Result<Self, CoreError> {
        let path = paths.cache_state_path();
        let mut state = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice::<JournalState>(&data)
                .map_err(|e| CoreError::Serialization(format!("corrupt journal: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JournalState::empty(max_size),
            Err(e) => return Err(CoreError::Io(e)),
        };

        let mut healed = Vec::with_capacity(state.items.len());
        for item in state.items.drain(..) {
            let blob_path = paths.blob_path(&item.digest);
            if tokio::fs::try_exists(&blob_path).await.unwrap_or(false) {
                healed.push(item);
            } else {
                warn!(name = %item.name, tag = %item.tag, digest = %item.digest, "journal entry dropped: blob missing");
            }
        }
        state.items = healed;
        state.max_size = max_size;
        state.recompute();

        let journal = Self {
            paths,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
        };
        info!(items = journal.state.read().await.items.len(), "journal loaded");
        Ok(journal)
    }

    pub async fn snapshot(&self) -> JournalState {
        self.state.read().await.clone()
    }

    pub async fn total_size(&self) -> i64 {
        self.state.read().await.total_size
    }

    pub async fn max_size(&self) -> i64 {
        self.state.read().await.max_size
    }

    pub async fn find(&self, name: &str, tag: &str) -> Option<CachedImageEntry> {
        self.state
            .read()
            .await
            .items
            .iter()
            .find(|i| i.name == name && i.tag == tag)
            .cloned()
    }

    /// Update `lastAccessed` for an item, if present.
    pub async fn touch(&self, name: &str, tag: &str) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        if let Some(item) = state.items.iter_mut().find(|i| i.name == name && i.tag == tag) {
            item.last_accessed = Utc::now();
        }
        state.updated_at = Utc::now();
        drop(state);
        self.persist().await
    }

    /// Append or replace a cached image entry.
    pub async fn put_item(&self, entry: CachedImageEntry) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        state.items.retain(|i| !(i.name == entry.name && i.tag == entry.tag));
        state.items.push(entry);
        state.recompute();
        drop(state);
        self.persist().await
    }

    pub async fn remove_item(&self, name: &str, tag: &str) -> Result<Option<CachedImageEntry>, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        let idx = state.items.iter().position(|i| i.name == name && i.tag == tag);
        let removed = idx.map(|i| state.items.remove(i));
        state.recompute();
        drop(state);
        self.persist().await?;
        Ok(removed)
    }

    /// Remove the oldest-by-`lastAccessed` entries until `total_size ≤ target`,
    /// returning the removed entries so the caller can reconcile blob refcounts.
    pub async fn evict_until(&self, target: i64) -> Result<Vec<CachedImageEntry>, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        state.items.sort_by_key(|i| i.last_accessed);

        let mut removed = Vec::new();
        while state.total_size > target && !state.items.is_empty() {
            removed.push(state.items.remove(0));
            state.recompute();
        }
        drop(state);
        self.persist().await?;
        Ok(removed)
    }

    /// Preview which entries the Eviction Engine would remove to bring
    /// `totalSize` down to `target`, skipping any whose digest is in
    /// `protected`. Does not mutate state; the caller removes each
    /// returned entry via [`Self::remove_item`].
    pub async fn evict_candidates(&self, target: i64, protected: &[String]) -> Vec<CachedImageEntry> {
        let state = self.state.read().await;
        let mut items: Vec<&CachedImageEntry> = state.items.iter().collect();
        items.sort_by_key(|i| i.last_accessed);

        let mut running_total = state.total_size;
        let mut candidates = Vec::new();
        for item in items {
            if running_total <= target {
                break;
            }
            if protected.contains(&item.digest) {
                continue;
            }
            running_total -= item.size;
            candidates.push(item.clone());
        }
        candidates
    }

    pub async fn get_decision(&self, digest: &str) -> Option<ScanDecision> {
        self.state.read().await.decisions.iter().find(|d| d.digest == digest).cloned()
    }

    pub async fn find_decisions_by_prefix(&self, prefix: &str) -> Vec<ScanDecision> {
        self.state
            .read()
            .await
            .decisions
            .iter()
            .filter(|d| d.digest.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn list_decisions(&self) -> Vec<ScanDecision> {
        self.state.read().await.decisions.clone()
    }

    pub async fn upsert_decision(&self, decision: ScanDecision) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        if let Some(existing) = state.decisions.iter_mut().find(|d| d.digest == decision.digest) {
            *existing = decision;
        } else {
            state.decisions.push(decision);
        }
        state.updated_at = Utc::now();
        drop(state);
        self.persist().await
    }

    pub async fn remove_decision(&self, digest: &str) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.state.write().await;
        state.decisions.retain(|d| d.digest != digest);
        state.updated_at = Utc::now();
        drop(state);
        self.persist().await
    }

    /// Blob refcounts across everything the journal currently tracks as
    /// proxy-cached. Pushed-image manifests are tracked separately by the
    /// Manifest Index and are not represented here.
    pub async fn blob_refcounts(&self) -> HashMap<String, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for item in &state.items {
            *counts.entry(item.digest.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Serialize the in-memory state to `state.json.tmp`, fsync, and rename
    /// over `state.json`. Must be called with `write_lock` held.
    async fn persist(&self) -> Result<(), CoreError> {
        let state = self.state.read().await;
        let data = serde_json::to_vec_pretty(&*state)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        drop(state);

        let dir = self.paths.cache_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let tmp = self.paths.cache_state_tmp_path();
        let target = self.paths.cache_state_path();

        let file = tokio::fs::File::create(&tmp).await?;
        {
            use tokio::io::AsyncWriteExt;
            let mut file = file;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await?;
        }

        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }
}

pub type SharedJournal = Arc<Journal>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn journal(max_size: i64) -> (tempfile::TempDir, Journal) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        paths.ensure_layout().await.unwrap();
        let journal = Journal::load(paths, max_size).await.unwrap();
        (dir, journal)
    }

    fn entry(name: &str, tag: &str, digest: &str, size: i64) -> CachedImageEntry {
        let now = Utc::now();
        CachedImageEntry {
            name: name.to_string(),
            tag: tag.to_string(),
            digest: digest.to_string(),
            size,
            cached_at: now,
            last_accessed: now,
            source_registry: "upstream".to_string(),
            original_ref: format!("{name}:{tag}"),
        }
    }

    #[tokio::test]
    async fn put_and_find_round_trips_and_persists() {
        let (dir, j) = journal(1_000_000).await;
        j.put_item(entry("library/nginx", "latest", "sha256:aa", 100)).await.unwrap();

        let found = j.find("library/nginx", "latest").await.unwrap();
        assert_eq!(found.digest, "sha256:aa");
        assert_eq!(j.total_size().await, 100);

        drop(j);
        let paths = PathResolver::new(dir.path());
        let reloaded = Journal::load(paths, 1_000_000).await.unwrap();
        // blob file doesn't actually exist on disk, so self-healing drops it
        assert!(reloaded.find("library/nginx", "latest").await.is_none());
    }

    #[tokio::test]
    async fn startup_self_heals_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        paths.ensure_layout().await.unwrap();
        let j = Journal::load(paths.clone(), 1_000_000).await.unwrap();
        j.put_item(entry("library/nginx", "latest", "sha256:missing", 50)).await.unwrap();
        drop(j);

        let reloaded = Journal::load(paths, 1_000_000).await.unwrap();
        assert!(reloaded.find("library/nginx", "latest").await.is_none());
        assert_eq!(reloaded.total_size().await, 0);
    }

    #[tokio::test]
    async fn evict_until_removes_oldest_first() {
        let (_dir, j) = journal(1_000_000).await;
        let mut old = entry("a/repo", "v1", "sha256:a1", 100);
        old.last_accessed = Utc::now() - chrono::Duration::hours(2);
        j.put_item(old).await.unwrap();
        j.put_item(entry("b/repo", "v1", "sha256:b1", 100)).await.unwrap();

        let removed = j.evict_until(100).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "a/repo");
        assert_eq!(j.total_size().await, 100);
    }

    #[tokio::test]
    async fn decision_upsert_and_prefix_lookup() {
        let (_dir, j) = journal(1_000_000).await;
        j.upsert_decision(ScanDecision {
            digest: "sha256:abcdef0123456789".to_string(),
            image_name: "library/nginx".to_string(),
            tag: "latest".to_string(),
            status: ScanStatus::Pending,
            reason: None,
            decided_by: None,
            decided_at: None,
            expires_at: None,
            scan_result: None,
        })
        .await
        .unwrap();

        let matches = j.find_decisions_by_prefix("sha256:abcdef").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(j.get_decision("sha256:abcdef0123456789").await.unwrap().status, ScanStatus::Pending);
    }
}
