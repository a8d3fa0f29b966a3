//! Upstream Manager: the configured set of upstream registries, reloadable
//! without restart, plus the route matcher that picks one for a given
//! repository path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use wharf_db::{Database, Upstream};
use wharf_proxy::{UpstreamClient, UpstreamClientConfig};

use crate::error::CoreError;
use crate::upstream::router::RouteMatcher;

/// Three consecutive failures mark an upstream unhealthy; one success
/// clears it (mirrored in `wharf-db`'s `record_upstream_failure`).
const UNHEALTHY_THRESHOLD: i64 = 3;

struct Entry {
    upstream: Upstream,
    client: Arc<UpstreamClient>,
}

pub struct UpstreamManager {
    db: Database,
    entries: RwLock<HashMap<i64, Entry>>,
    matcher: RwLock<RouteMatcher>,
    default_upstream_id: RwLock<Option<i64>>,
}

impl UpstreamManager {
    pub async fn load(db: Database) -> Result<Self, CoreError> {
        let manager = Self {
            db,
            entries: RwLock::new(HashMap::new()),
            matcher: RwLock::new(RouteMatcher::new(Vec::new())),
            default_upstream_id: RwLock::new(None),
        };
        manager.reload().await?;
        Ok(manager)
    }

    /// Re-read upstreams and routes from the Ambient Store and rebuild the
    /// route matcher. Safe to call while requests are in flight.
    pub async fn reload(&self) -> Result<(), CoreError> {
        let upstreams = self.db.list_enabled_upstreams().await?;
        let routes = self.db.list_upstream_routes().await?;
        let mut default_id = None;
        let mut new_entries = HashMap::new();

        for upstream in upstreams {
            if upstream.is_default {
                default_id = Some(upstream.id);
            }

            let client = UpstreamClient::new(UpstreamClientConfig {
                base_url: upstream.base_url.clone(),
                username: upstream.username.clone(),
                password: upstream.password.clone(),
            })?;
            new_entries.insert(upstream.id, Entry { upstream, client: Arc::new(client) });
        }

        *self.entries.write().await = new_entries;
        *self.matcher.write().await = RouteMatcher::new(routes);
        *self.default_upstream_id.write().await = default_id;

        let count = self.entries.read().await.len();
        info!(count, "upstreams reloaded");
        Ok(())
    }

    /// Resolve a repository path to the upstream that should serve it:
    /// route match first, falling back to the configured default.
    pub async fn resolve(&self, repository: &str) -> Result<(Upstream, Arc<UpstreamClient>), CoreError> {
        let upstream_id = {
            let matcher = self.matcher.read().await;
            matcher.find_match(repository).map(|m| m.upstream_id)
        };

        let upstream_id = match upstream_id {
            Some(id) => Some(id),
            None => *self.default_upstream_id.read().await,
        };

        let upstream_id = upstream_id.ok_or_else(|| CoreError::NoUpstream(repository.to_string()))?;

        let entries = self.entries.read().await;
        let entry = entries
            .get(&upstream_id)
            .ok_or_else(|| CoreError::NoUpstream(repository.to_string()))?;
        Ok((entry.upstream.clone(), entry.client.clone()))
    }

    /// Ping every configured upstream and update health state via the
    /// Ambient Store.
    pub async fn check_health(&self) {
        let snapshot: Vec<(i64, Arc<UpstreamClient>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, e)| (*id, e.client.clone()))
            .collect();

        for (id, client) in snapshot {
            match client.ping().await {
                Ok(true) => {
                    if let Err(e) = self.db.record_upstream_success(id).await {
                        warn!(upstream_id = id, error = %e, "failed to record upstream success");
                    }
                }
                Ok(false) | Err(_) => {
                    if let Err(e) = self.db.record_upstream_failure(id).await {
                        warn!(upstream_id = id, error = %e, "failed to record upstream failure");
                    }
                }
            }
        }
    }

    pub async fn is_healthy(&self, upstream_id: i64) -> bool {
        self.entries
            .read()
            .await
            .get(&upstream_id)
            .map(|e| e.upstream.consecutive_failures < UNHEALTHY_THRESHOLD)
            .unwrap_or(false)
    }

    pub async fn list(&self) -> Vec<Upstream> {
        self.entries.read().await.values().map(|e| e.upstream.clone()).collect()
    }
}
