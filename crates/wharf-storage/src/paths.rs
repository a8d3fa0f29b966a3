//! Path Resolver
//!
//! Pure functions mapping semantic identifiers (kind, name, reference) to
//! absolute paths under a configured base directory. The only I/O this
//! module performs is directory creation at startup; every other function
//! here is a string computation.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Resolves the fixed directory layout rooted at `base`:
///
/// ```text
/// <base>/temp/<uuid>
/// <base>/blobs/<digest>
/// <base>/manifests/<name>/<tag>.json
/// <base>/charts/<name>-<version>.tgz
/// <base>/charts/index.yaml
/// <base>/images/<name>/manifests/<safe-ref>.json
/// <base>/cache/state.json
/// <base>/cache/metadata/<safe-name>_<tag>.json
/// ```
#[derive(Clone, Debug)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create the fixed directory layout, mode 0755 on Unix.
    pub async fn ensure_layout(&self) -> Result<(), StorageError> {
        for dir in [
            self.temp_dir(),
            self.blobs_dir(),
            self.manifests_dir(),
            self.charts_dir(),
            self.images_dir(),
            self.cache_metadata_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o755);
                tokio::fs::set_permissions(&dir, perms).await?;
            }
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base.join("temp")
    }

    pub fn temp_session_path(&self, uuid: &str) -> PathBuf {
        self.temp_dir().join(uuid)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.base.join("blobs")
    }

    /// Blob files are addressed by their full digest (`sha256:<hex>`), with
    /// `:` substituted for `_` so the digest is a single valid path
    /// component. This substitution is bijective given the Validator's
    /// restricted digest alphabet (§4.B): `_` never appears in a valid
    /// algorithm name or hex digest, so it can only have come from `:`.
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.blobs_dir().join(encode_digest(digest))
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.base.join("manifests")
    }

    pub fn manifest_repo_dir(&self, name: &str) -> PathBuf {
        self.manifests_dir().join(name)
    }

    pub fn manifest_tag_path(&self, name: &str, tag: &str) -> PathBuf {
        self.manifest_repo_dir(name).join(format!("{tag}.json"))
    }

    pub fn charts_dir(&self) -> PathBuf {
        self.base.join("charts")
    }

    pub fn chart_tarball_path(&self, name: &str, version: &str) -> PathBuf {
        self.charts_dir().join(format!("{name}-{version}.tgz"))
    }

    pub fn chart_index_path(&self) -> PathBuf {
        self.charts_dir().join("index.yaml")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.base.join("images")
    }

    pub fn image_manifest_path(&self, name: &str, reference: &str) -> PathBuf {
        self.images_dir()
            .join(name)
            .join("manifests")
            .join(format!("{}.json", encode_digest(reference)))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    pub fn cache_state_path(&self) -> PathBuf {
        self.cache_dir().join("state.json")
    }

    pub fn cache_state_tmp_path(&self) -> PathBuf {
        self.cache_dir().join("state.json.tmp")
    }

    pub fn cache_metadata_dir(&self) -> PathBuf {
        self.cache_dir().join("metadata")
    }

    /// Cache metadata filenames replace `/` in the repository name with `_`,
    /// safe under the same alphabet argument as `encode_digest`.
    pub fn cache_metadata_path(&self, name: &str, tag: &str) -> PathBuf {
        let safe_name = name.replace('/', "_");
        self.cache_metadata_dir()
            .join(format!("{safe_name}_{tag}.json"))
    }
}

/// `:` → `_` substitution used for digests embedded in filenames.
pub fn encode_digest(digest: &str) -> String {
    digest.replace(':', "_")
}

/// Inverse of [`encode_digest`]. Callers MUST re-validate the result with
/// the Validator before trusting it — the substitution is lossy in
/// general and is only safe given the Validator's restricted alphabet.
pub fn decode_digest(encoded: &str) -> String {
    encoded.replacen('_', ":", 1)
}

pub fn strip_json_ext(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_encoding_round_trips() {
        let digest = "sha256:abcd1234";
        let encoded = encode_digest(digest);
        assert_eq!(encoded, "sha256_abcd1234");
        assert_eq!(decode_digest(&encoded), digest);
    }

    #[test]
    fn layout_paths_are_rooted_at_base() {
        let r = PathResolver::new("/srv/wharf");
        assert_eq!(r.blob_path("sha256:aa"), Path::new("/srv/wharf/blobs/sha256_aa"));
        assert_eq!(
            r.manifest_tag_path("library/nginx", "latest"),
            Path::new("/srv/wharf/manifests/library/nginx/latest.json")
        );
        assert_eq!(
            r.chart_tarball_path("foo", "1.1.0"),
            Path::new("/srv/wharf/charts/foo-1.1.0.tgz")
        );
        assert_eq!(
            r.cache_metadata_path("library/nginx", "latest"),
            Path::new("/srv/wharf/cache/metadata/library_nginx_latest.json")
        );
    }
}
