//! Wharf Cache - combined OCI image / Helm chart registry with an
//! upstream proxy cache and an administrative vulnerability-scan gate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use wharf_api::{AppState, MetricsHandle, create_router};
use wharf_auth::JwtManager;
use wharf_core::RegistryService;
use wharf_core::scan::ScanGatePolicy;
use wharf_db::Database;
use wharf_storage::PathResolver;

/// How often the background task runs eviction and upstream health checks.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "WHARF_CACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "WHARF_CACHE_PORT")]
    port: Option<u16>,

    /// Directory holding cached blobs, manifests, charts and the journal
    #[arg(long, default_value = "./data/store", env = "WHARF_CACHE_STORE")]
    store: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_or_init(&args.config)?;

    init_logging(&config.logging.level);

    info!("starting wharf-cache v{}", env!("CARGO_PKG_VERSION"));

    let db_path = format!("sqlite:{}?mode=rwc", config.database.path);
    let db = Database::new(&db_path).await?;

    if !db.has_users().await? {
        info!("no users found, creating default admin user");
        let password_hash = wharf_auth::hash_password("admin")?;
        db.insert_user(wharf_db::NewUser {
            username: "admin".to_string(),
            password_hash,
            role: wharf_db::UserRole::Admin,
        })
        .await?;
        info!("default admin user created (username: admin, password: admin) - change this immediately");
    }

    let paths = PathResolver::new(args.store.as_str());
    let scan_policy = ScanGatePolicy {
        admit_pending_on_pull: config.scan.admit_pending_on_pull,
        default_approval_ttl_days: config.scan.default_approval_ttl_days,
    };
    let registry = Arc::new(RegistryService::new(paths, db.clone(), config.cache.max_size as i64, scan_policy).await?);

    let jwt = Arc::new(JwtManager::new(&config.auth.jwt_secret, 24));

    spawn_maintenance_task(registry.clone());

    let state = AppState::new(db, registry, jwt, config.auth.enabled, PathBuf::from(&args.config));

    let metrics_handle = init_metrics();

    let app = create_router(state, metrics_handle.map(Arc::new)).layer(TraceLayer::new_for_http());

    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{bind_addr}:{port}").parse()?;

    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("server stopped");
    Ok(())
}

/// Periodically run eviction and re-check upstream health so a long-lived
/// process doesn't need an external cron to stay under the cache ceiling.
fn spawn_maintenance_task(registry: Arc<RegistryService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            registry.upstreams.check_health().await;
            match registry.cache_cleanup().await {
                Ok(evicted) if evicted > 0 => info!(evicted, "cache eviction reclaimed entries"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "cache eviction failed"),
            }
        }
    })
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

fn init_metrics() -> Option<MetricsHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("prometheus metrics enabled at /metrics");

            metrics::describe_counter!("wharf_cache_requests_total", "Total number of cache requests");
            metrics::describe_counter!("wharf_cache_hits_total", "Total number of cache hits");
            metrics::describe_counter!("wharf_cache_misses_total", "Total number of cache misses");
            metrics::describe_gauge!("wharf_cache_size_bytes", "Current cache size in bytes");
            metrics::describe_gauge!("wharf_cache_entries", "Current number of cache entries");
            metrics::describe_histogram!("wharf_cache_request_duration_seconds", "Request duration in seconds");

            Some(handle)
        }
        Err(e) => {
            tracing::warn!("failed to initialize prometheus metrics: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
}
