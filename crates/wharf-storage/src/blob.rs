//! Blob Store
//!
//! Content-addressed byte storage with streaming upload sessions, digest
//! verification, and atomic commit. Every commit ends in a single `rename`
//! within `base`, so `base` MUST live on one filesystem (§5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::paths::PathResolver;

pub type ByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// In-memory tracking for an open upload session. The file on disk is the
/// durable half; this struct is the authoritative byte-offset cursor so
/// `appendChunk` can reject out-of-order writes without re-`stat`-ing.
struct UploadSession {
    path: PathBuf,
    hasher: Sha256,
    bytes_received: u64,
}

/// Content-addressed blob store backed by a single local filesystem.
pub struct BlobStore {
    paths: PathResolver,
    sessions: Arc<Mutex<HashMap<String, UploadSession>>>,
}

impl BlobStore {
    pub fn new(paths: PathResolver) -> Self {
        Self {
            paths,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Allocates a session directory and empty file, returns its UUID.
    pub async fn start_upload(&self) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        let path = self.paths.temp_session_path(&id);
        File::create(&path).await?;

        self.sessions.lock().insert(
            id.clone(),
            UploadSession {
                path,
                hasher: Sha256::new(),
                bytes_received: 0,
            },
        );

        Ok(id)
    }

    /// Validates that `offset` is exactly the number of bytes already
    /// received, then appends `data` and updates the running digest.
    /// Returns the new total byte count.
    pub async fn append_chunk(
        &self,
        session_id: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<u64, StorageError> {
        let path = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;

            if offset != session.bytes_received {
                return Err(StorageError::OutOfOrder {
                    expected: session.bytes_received,
                    actual: offset,
                });
            }

            session.hasher.update(&data);
            session.bytes_received += data.len() as u64;
            session.path.clone()
        };

        let mut file = fs::OpenOptions::new().append(true).open(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        Ok(self.sessions.lock().get(session_id).unwrap().bytes_received)
    }

    /// Finalizes the session. If `expected_digest` is provided and differs
    /// from the computed digest, the session is deleted and
    /// `DigestMismatch` is returned. On success the temp file is renamed to
    /// `blobs/<digest>`; if that blob already exists the session file is
    /// discarded instead (dedup), and the rename that "wins" observes a
    /// single file on disk regardless of which concurrent commit gets there
    /// first.
    pub async fn commit(
        &self,
        session_id: &str,
        expected_digest: Option<&str>,
    ) -> Result<String, StorageError> {
        let (path, computed) = {
            let sessions = self.sessions.lock();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;
            let digest = format!("sha256:{}", hex::encode(session.hasher.clone().finalize()));
            (session.path.clone(), digest)
        };

        if let Some(expected) = expected_digest {
            if expected != computed {
                self.abort_internal(session_id, &path).await?;
                return Err(StorageError::DigestMismatch {
                    expected: expected.to_string(),
                    actual: computed,
                });
            }
        }

        let blob_path = self.paths.blob_path(&computed);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(&path, &blob_path).await {
            Ok(()) => {}
            Err(_) if fs::try_exists(&blob_path).await.unwrap_or(false) => {
                debug!(digest = %computed, "blob already committed by another session, discarding duplicate");
                let _ = fs::remove_file(&path).await;
            }
            Err(e) => return Err(StorageError::Io(e)),
        }

        self.sessions.lock().remove(session_id);
        Ok(computed)
    }

    /// Deletes the session's temp file without producing a blob.
    pub async fn abort(&self, session_id: &str) -> Result<(), StorageError> {
        let path = {
            let mut sessions = self.sessions.lock();
            sessions.remove(session_id).map(|s| s.path)
        };
        if let Some(path) = path {
            self.abort_internal(session_id, &path).await?;
        }
        Ok(())
    }

    async fn abort_internal(&self, session_id: &str, path: &PathBuf) -> Result<(), StorageError> {
        self.sessions.lock().remove(session_id);
        match fs::remove_file(path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    pub fn bytes_received(&self, session_id: &str) -> Option<u64> {
        self.sessions.lock().get(session_id).map(|s| s.bytes_received)
    }

    pub async fn exists(&self, digest: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.paths.blob_path(digest)).await?)
    }

    pub async fn size(&self, digest: &str) -> Result<u64, StorageError> {
        let path = self.paths.blob_path(digest);
        let meta = fs::metadata(&path).await.map_err(not_found(digest))?;
        Ok(meta.len())
    }

    pub async fn read(&self, digest: &str) -> Result<Bytes, StorageError> {
        let path = self.paths.blob_path(digest);
        let data = fs::read(&path).await.map_err(not_found(digest))?;
        Ok(Bytes::from(data))
    }

    pub async fn stream(&self, digest: &str) -> Result<ByteStream, StorageError> {
        let path = self.paths.blob_path(digest);
        let file = File::open(&path).await.map_err(not_found(digest))?;
        let reader = BufReader::new(file);
        let stream = tokio_util::io::ReaderStream::new(reader).map(|r| r.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    /// Writes a blob directly from an in-memory buffer (used when the
    /// caller already has the full payload, e.g. small manifests).
    pub async fn write(&self, data: Bytes) -> Result<String, StorageError> {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&data)));
        let blob_path = self.paths.blob_path(&digest);
        if fs::try_exists(&blob_path).await? {
            return Ok(digest);
        }
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.paths.temp_session_path(&Uuid::new_v4().to_string());
        fs::write(&tmp, &data).await?;
        match fs::rename(&tmp, &blob_path).await {
            Ok(()) => {}
            Err(_) if fs::try_exists(&blob_path).await.unwrap_or(false) => {
                let _ = fs::remove_file(&tmp).await;
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
        Ok(digest)
    }

    /// Callers must ensure the refcount is zero before calling this.
    pub async fn delete(&self, digest: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.paths.blob_path(digest)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Lists every digest currently present under `blobs/` (used by the
    /// startup self-heal pass and orphan-detection tooling).
    pub async fn list_digests(&self) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(self.paths.blobs_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StorageError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                out.push(crate::paths::decode_digest(name));
            }
        }
        Ok(out)
    }
}

fn not_found(digest: &str) -> impl Fn(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(digest.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (BlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        paths.ensure_layout().await.unwrap();
        (BlobStore::new(paths), dir)
    }

    #[tokio::test]
    async fn upload_round_trip() {
        let (store, _dir) = store().await;
        let id = store.start_upload().await.unwrap();
        store
            .append_chunk(&id, 0, Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        let digest = store.commit(&id, None).await.unwrap();
        assert_eq!(
            digest,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        let bytes = store.read(&digest).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_rejected() {
        let (store, _dir) = store().await;
        let id = store.start_upload().await.unwrap();
        let err = store
            .append_chunk(&id, 5, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { expected: 0, actual: 5 }));
    }

    #[tokio::test]
    async fn digest_mismatch_deletes_session() {
        let (store, _dir) = store().await;
        let id = store.start_upload().await.unwrap();
        store
            .append_chunk(&id, 0, Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        let err = store.commit(&id, Some("sha256:deadbeef")).await.unwrap_err();
        assert!(matches!(err, StorageError::DigestMismatch { .. }));
        assert!(store.bytes_received(&id).is_none());
    }

    #[tokio::test]
    async fn concurrent_identical_commits_dedup() {
        let (store, _dir) = store().await;
        let payload = Bytes::from(vec![7u8; 1024 * 1024]);

        let mut digests = Vec::new();
        for _ in 0..2 {
            let id = store.start_upload().await.unwrap();
            store.append_chunk(&id, 0, payload.clone()).await.unwrap();
            digests.push(store.commit(&id, None).await.unwrap());
        }

        assert_eq!(digests[0], digests[1]);
    }
}
