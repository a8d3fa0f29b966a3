//! Chart Store: Helm chart tarballs plus a generated `index.yaml`.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use wharf_storage::PathResolver;

use crate::digest::compute_sha256;
use crate::error::CoreError;

/// Media type for a Helm chart pushed through the OCI-artifact path.
pub const HELM_CHART_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartIndexEntry {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub created: String,
    pub digest: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartIndex {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub generated: String,
    pub entries: BTreeMap<String, Vec<ChartIndexEntry>>,
}

/// Stores chart tarballs and keeps `charts/index.yaml` in sync with what is
/// on disk. Regeneration is serialized by a single async mutex and run
/// after every mutation rather than computed lazily, since consumers (Helm
/// CLI clients) fetch `index.yaml` directly.
pub struct ChartStore {
    paths: PathResolver,
    regen_lock: Mutex<()>,
}

/// `name-version.tgz` parsed into its components.
fn parse_chart_filename(filename: &str) -> Option<(String, String)> {
    let stem = filename.strip_suffix(".tgz")?;
    // version starts at the last '-' that is followed by a digit, matching
    // Helm's own convention of `<name>-<semver>.tgz`.
    let dash = stem.rfind('-')?;
    let (name, rest) = stem.split_at(dash);
    let version = &rest[1..];
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

impl ChartStore {
    pub fn new(paths: PathResolver) -> Self {
        Self {
            paths,
            regen_lock: Mutex::new(()),
        }
    }

    /// Store a chart tarball, derive its name/version from the filename,
    /// and regenerate `index.yaml`.
    pub async fn put(&self, name: &str, version: &str, data: Bytes) -> Result<String, CoreError> {
        let digest = compute_sha256(&data);
        tokio::fs::create_dir_all(self.paths.charts_dir()).await?;
        let path = self.paths.chart_tarball_path(name, version);
        let tmp = path.with_extension("tgz.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(chart = name, version, digest = %digest, "chart stored");
        self.regenerate_index().await?;
        Ok(digest)
    }

    pub async fn get(&self, name: &str, version: &str) -> Result<Bytes, CoreError> {
        let path = self.paths.chart_tarball_path(name, version);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("{name}-{version}.tgz")))
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Fetch a chart tarball by digest, scanning `charts/` for a match.
    pub async fn get_by_digest(&self, digest: &str) -> Result<(String, String, Bytes), CoreError> {
        let mut entries = tokio::fs::read_dir(self.paths.charts_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            let Some((name, version)) = parse_chart_filename(filename) else {
                continue;
            };
            let data = tokio::fs::read(&path).await?;
            if compute_sha256(&data) == digest {
                return Ok((name, version, Bytes::from(data)));
            }
        }
        Err(CoreError::NotFound(digest.to_string()))
    }

    pub async fn delete(&self, name: &str, version: &str) -> Result<(), CoreError> {
        let path = self.paths.chart_tarball_path(name, version);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.regenerate_index().await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("{name}-{version}.tgz")))
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Current `index.yaml` contents, regenerating first if missing.
    pub async fn index_yaml(&self) -> Result<String, CoreError> {
        let path = self.paths.chart_index_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.regenerate_index().await?;
                Ok(tokio::fs::read_to_string(&path).await?)
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Walk `charts/`, rebuild the index document, and atomically replace
    /// `index.yaml`.
    async fn regenerate_index(&self) -> Result<(), CoreError> {
        let _guard = self.regen_lock.lock().await;

        let mut entries: BTreeMap<String, Vec<ChartIndexEntry>> = BTreeMap::new();
        let mut dir = tokio::fs::read_dir(self.paths.charts_dir()).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            let Some((name, version)) = parse_chart_filename(filename) else {
                continue;
            };

            let data = tokio::fs::read(&path).await?;
            let metadata = entry.metadata().await?;
            let created = metadata
                .created()
                .ok()
                .and_then(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339().into())
                .unwrap_or_else(|| Utc::now().to_rfc3339());

            entries.entry(name.clone()).or_default().push(ChartIndexEntry {
                name,
                version,
                description: None,
                api_version: "v2".to_string(),
                created,
                digest: compute_sha256(&data),
                urls: vec![filename.to_string()],
            });
        }

        for versions in entries.values_mut() {
            versions.sort_by(|a, b| b.version.cmp(&a.version));
        }

        let index = ChartIndex {
            api_version: "v1".to_string(),
            generated: Utc::now().to_rfc3339(),
            entries,
        };

        let yaml = serde_yaml::to_string(&index)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;

        let path = self.paths.chart_index_path();
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_version() {
        assert_eq!(
            parse_chart_filename("redis-17.11.3.tgz"),
            Some(("redis".to_string(), "17.11.3".to_string()))
        );
        assert_eq!(parse_chart_filename("not-a-chart"), None);
    }

    #[tokio::test]
    async fn put_regenerates_index_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChartStore::new(PathResolver::new(dir.path()));

        store.put("redis", "17.11.3", Bytes::from_static(b"fake-tgz")).await.unwrap();

        let fetched = store.get("redis", "17.11.3").await.unwrap();
        assert_eq!(fetched, Bytes::from_static(b"fake-tgz"));

        let index = store.index_yaml().await.unwrap();
        assert!(index.contains("redis"));
        assert!(index.contains("17.11.3"));
    }
}
