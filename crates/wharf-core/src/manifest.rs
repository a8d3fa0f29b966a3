//! Manifest Index: per-repository storage of tagged OCI manifest documents.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use wharf_storage::PathResolver;
use wharf_storage::validate::{validate_repository_name, validate_tag};

use crate::digest::compute_sha256;
use crate::error::CoreError;

/// A stored manifest document.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub repository: String,
    pub reference: String,
    pub data: Bytes,
    pub digest: String,
}

/// Indexes manifests by `(name, tag)`, with digest lookup done by scanning
/// and hashing tag files. A per-repository lock serializes writers against
/// readers of the same repository; different repositories proceed
/// independently.
pub struct ManifestIndex {
    paths: PathResolver,
    repo_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ManifestIndex {
    pub fn new(paths: PathResolver) -> Self {
        Self {
            paths,
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.repo_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Store a manifest under `(name, tag)`, returning its computed digest.
    pub async fn put(&self, name: &str, tag: &str, data: Bytes) -> Result<String, CoreError> {
        validate_repository_name(name).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        validate_tag(tag).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        serde_json::from_slice::<serde_json::Value>(&data)
            .map_err(|e| CoreError::BadRequest(format!("manifest is not valid JSON: {e}")))?;

        let digest = compute_sha256(&data);
        let lock = self.lock_for(name);
        let _guard = lock.write().await;

        let dir = self.paths.manifest_repo_dir(name);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.paths.manifest_tag_path(name, tag);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(repository = name, tag, digest = %digest, "manifest stored");
        Ok(digest)
    }

    /// Fetch a manifest by tag.
    pub async fn get_by_tag(&self, name: &str, tag: &str) -> Result<Bytes, CoreError> {
        validate_repository_name(name).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        validate_tag(tag).map_err(|e| CoreError::BadRequest(e.to_string()))?;

        let lock = self.lock_for(name);
        let _guard = lock.read().await;

        let path = self.paths.manifest_tag_path(name, tag);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("{name}:{tag}")))
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Fetch a manifest by digest, scanning every tag file under the
    /// repository and hashing it until a match is found.
    pub async fn get_by_digest(&self, name: &str, digest: &str) -> Result<Bytes, CoreError> {
        validate_repository_name(name).map_err(|e| CoreError::BadRequest(e.to_string()))?;

        let lock = self.lock_for(name);
        let _guard = lock.read().await;

        let dir = self.paths.manifest_repo_dir(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::NotFound(format!("{name}@{digest}")));
            }
            Err(e) => return Err(CoreError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path).await?;
            if compute_sha256(&data) == digest {
                return Ok(Bytes::from(data));
            }
        }

        Err(CoreError::NotFound(format!("{name}@{digest}")))
    }

    /// List every tag stored for a repository.
    pub async fn list(&self, name: &str) -> Result<Vec<String>, CoreError> {
        validate_repository_name(name).map_err(|e| CoreError::BadRequest(e.to_string()))?;

        let lock = self.lock_for(name);
        let _guard = lock.read().await;

        let dir = self.paths.manifest_repo_dir(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::Io(e)),
        };

        let mut tags = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(stem) = wharf_storage::paths::strip_json_ext(&path) {
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    tags.push(stem.to_string());
                }
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// Whether any stored manifest, in any repository, references `digest`
    /// as its own digest or within its body (e.g. a layer or config blob).
    /// Used by the Eviction Engine to avoid deleting a blob that a pushed
    /// image still depends on.
    pub async fn is_digest_referenced(&self, digest: &str) -> Result<bool, CoreError> {
        let needle = digest.as_bytes();
        let mut repos = match tokio::fs::read_dir(self.paths.manifests_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CoreError::Io(e)),
        };

        while let Some(repo_entry) = repos.next_entry().await? {
            if !repo_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut tags = tokio::fs::read_dir(repo_entry.path()).await?;
            while let Some(tag_entry) = tags.next_entry().await? {
                let path = tag_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let data = tokio::fs::read(&path).await?;
                if compute_sha256(&data) == digest || contains(&data, needle) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Delete a tag's manifest.
    pub async fn delete(&self, name: &str, tag: &str) -> Result<(), CoreError> {
        validate_repository_name(name).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        validate_tag(tag).map_err(|e| CoreError::BadRequest(e.to_string()))?;

        let lock = self.lock_for(name);
        let _guard = lock.write().await;

        let path = self.paths.manifest_tag_path(name, tag);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("{name}:{tag}")))
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> (tempfile::TempDir, ManifestIndex) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        (dir, ManifestIndex::new(paths))
    }

    #[tokio::test]
    async fn put_then_get_by_tag_and_digest() {
        let (_dir, idx) = index();
        let data = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let digest = idx.put("library/nginx", "latest", data.clone()).await.unwrap();

        let by_tag = idx.get_by_tag("library/nginx", "latest").await.unwrap();
        assert_eq!(by_tag, data);

        let by_digest = idx.get_by_digest("library/nginx", &digest).await.unwrap();
        assert_eq!(by_digest, data);
    }

    #[tokio::test]
    async fn list_and_delete() {
        let (_dir, idx) = index();
        let data = Bytes::from_static(br#"{"schemaVersion":2}"#);
        idx.put("library/nginx", "latest", data.clone()).await.unwrap();
        idx.put("library/nginx", "v1", data).await.unwrap();

        let tags = idx.list("library/nginx").await.unwrap();
        assert_eq!(tags, vec!["latest".to_string(), "v1".to_string()]);

        idx.delete("library/nginx", "v1").await.unwrap();
        let tags = idx.list("library/nginx").await.unwrap();
        assert_eq!(tags, vec!["latest".to_string()]);
    }

    #[tokio::test]
    async fn rejects_non_json_manifest() {
        let (_dir, idx) = index();
        let result = idx.put("library/nginx", "latest", Bytes::from_static(b"not json")).await;
        assert!(result.is_err());
    }
}
