//! Configuration loading and management.
//!
//! Upstream registries are *not* configured here — they live in the
//! Ambient Store (`wharf_db::Upstream`) and are managed through the
//! `/api/v1/upstreams` admin surface, reloadable without a restart. This
//! file covers everything that must be known before the database and
//! registry core can even be constructed.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wharf_core::scan::AdmitPendingPolicy;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_size")]
    pub max_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,
}

/// Knobs for the Scan Gate's admission policy (`wharf_core::scan::ScanGatePolicy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub admit_pending_on_pull: AdmitPendingPolicy,
    #[serde(default = "default_approval_ttl_days")]
    pub default_approval_ttl_days: i64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { admit_pending_on_pull: AdmitPendingPolicy::default(), default_approval_ttl_days: default_approval_ttl_days() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_db_path() -> String {
    "./data/wharf-cache.db".to_string()
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_auth_enabled() -> bool {
    true
}

fn default_approval_ttl_days() -> i64 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a file, falling back to defaults when it
    /// doesn't exist yet.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path).with_context(|| format!("failed to read config file: {path}"))?;
        let config: Config = toml::from_str(&content).with_context(|| format!("failed to parse config file: {path}"))?;

        info!("loaded configuration from {}", path);
        Ok(config)
    }

    /// Write the configuration atomically: write to a temp file in the
    /// same directory, fsync, restrict permissions, then rename over the
    /// target so a crash mid-write never corrupts the live config.
    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = path_obj.parent().unwrap_or(Path::new("."));

        let temp_file = tempfile::NamedTempFile::new_in(parent).with_context(|| format!("failed to create temp file in {parent:?}"))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes()).context("failed to write to temp file")?;
            file.sync_all().context("failed to sync temp file")?;
        }

        #[cfg(unix)]
        {
            let metadata = temp_file.as_file().metadata()?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(temp_file.path(), perms).context("failed to set config file permissions")?;
        }

        temp_file.persist(path).with_context(|| format!("failed to persist config file: {path}"))?;

        info!("saved configuration to {}", path);
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { bind_address: default_bind_address(), port: default_port() },
            cache: CacheConfig { max_size: default_max_size() },
            database: DatabaseConfig { path: default_db_path() },
            auth: AuthConfig { jwt_secret: default_jwt_secret(), enabled: default_auth_enabled() },
            scan: ScanConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Write a freshly-generated default config to disk if none exists yet,
    /// so the first run leaves behind something an operator can edit.
    pub fn load_or_init(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            let config = Self::default();
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).with_context(|| format!("failed to create config directory {parent:?}"))?;
            }
            if let Err(e) = config.save(path) {
                warn!("failed to write default config to {}: {}", path, e);
            }
            return Ok(config);
        }
        Self::load(path)
    }
}
