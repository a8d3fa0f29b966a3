//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use wharf_auth::JwtManager;
use wharf_core::RegistryService;
use wharf_db::Database;

pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<RegistryService>,
    pub jwt: Arc<JwtManager>,
    pub auth_enabled: bool,
    pub config_path: PathBuf,
}

impl AppState {
    pub fn new(
        db: Database,
        registry: Arc<RegistryService>,
        jwt: Arc<JwtManager>,
        auth_enabled: bool,
        config_path: PathBuf,
    ) -> Self {
        Self { db, registry, jwt, auth_enabled, config_path }
    }
}
