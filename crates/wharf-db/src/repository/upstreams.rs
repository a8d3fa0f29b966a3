//! Upstream registry configuration and routing rules

use chrono::Utc;
use sqlx::Row;

use crate::error::DbError;
use crate::models::{NewUpstream, NewUpstreamRoute, UpdateUpstream, Upstream, UpstreamRoute};
use crate::repository::Database;
use crate::utils::parse_datetime_or_now;

fn row_to_upstream(row: &sqlx::sqlite::SqliteRow) -> Upstream {
    Upstream {
        id: row.get("id"),
        name: row.get("name"),
        display_name: row.get("display_name"),
        base_url: row.get("base_url"),
        username: row.get("username"),
        password: row.get("password"),
        isolated_cache: row.get("isolated_cache"),
        is_default: row.get("is_default"),
        enabled: row.get("enabled"),
        healthy: row.get("healthy"),
        consecutive_failures: row.get("consecutive_failures"),
        created_at: parse_datetime_or_now(row.get("created_at")),
        updated_at: parse_datetime_or_now(row.get("updated_at")),
    }
}

fn row_to_route(row: &sqlx::sqlite::SqliteRow) -> UpstreamRoute {
    UpstreamRoute {
        id: row.get("id"),
        upstream_id: row.get("upstream_id"),
        pattern: row.get("pattern"),
        priority: row.get("priority"),
        created_at: parse_datetime_or_now(row.get("created_at")),
    }
}

const UPSTREAM_COLUMNS: &str = "id, name, display_name, base_url, username, password, \
    isolated_cache, is_default, enabled, healthy, consecutive_failures, created_at, updated_at";

impl Database {
    // ==================== Upstream operations ====================

    /// Insert a new upstream
    pub async fn insert_upstream(&self, upstream: NewUpstream) -> Result<Upstream, DbError> {
        let now = Utc::now();

        if upstream.is_default {
            sqlx::query("UPDATE upstreams SET is_default = 0 WHERE is_default = 1")
                .execute(&self.pool)
                .await?;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO upstreams (name, display_name, base_url, username, password,
                                    isolated_cache, is_default, enabled, healthy,
                                    consecutive_failures, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, 1, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&upstream.name)
        .bind(&upstream.display_name)
        .bind(&upstream.base_url)
        .bind(&upstream.username)
        .bind(&upstream.password)
        .bind(upstream.isolated_cache)
        .bind(upstream.is_default)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = result.get("id");

        Ok(Upstream {
            id,
            name: upstream.name,
            display_name: upstream.display_name,
            base_url: upstream.base_url,
            username: upstream.username,
            password: upstream.password,
            isolated_cache: upstream.isolated_cache,
            is_default: upstream.is_default,
            enabled: true,
            healthy: true,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get an upstream by ID
    pub async fn get_upstream(&self, id: i64) -> Result<Option<Upstream>, DbError> {
        let result = sqlx::query(&format!(
            "SELECT {UPSTREAM_COLUMNS} FROM upstreams WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.as_ref().map(row_to_upstream))
    }

    /// Get an upstream by name
    pub async fn get_upstream_by_name(&self, name: &str) -> Result<Option<Upstream>, DbError> {
        let result = sqlx::query(&format!(
            "SELECT {UPSTREAM_COLUMNS} FROM upstreams WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.as_ref().map(row_to_upstream))
    }

    /// Get the enabled default upstream, if any
    pub async fn get_default_upstream(&self) -> Result<Option<Upstream>, DbError> {
        let result = sqlx::query(&format!(
            "SELECT {UPSTREAM_COLUMNS} FROM upstreams WHERE is_default = 1 AND enabled = 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.as_ref().map(row_to_upstream))
    }

    /// List all upstreams
    pub async fn list_upstreams(&self) -> Result<Vec<Upstream>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {UPSTREAM_COLUMNS} FROM upstreams ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_upstream).collect())
    }

    /// List enabled upstreams
    pub async fn list_enabled_upstreams(&self) -> Result<Vec<Upstream>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {UPSTREAM_COLUMNS} FROM upstreams WHERE enabled = 1 ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_upstream).collect())
    }

    /// Apply a partial update to an upstream
    pub async fn update_upstream(
        &self,
        id: i64,
        update: UpdateUpstream,
    ) -> Result<Option<Upstream>, DbError> {
        let now = Utc::now();

        if update.is_default == Some(true) {
            sqlx::query("UPDATE upstreams SET is_default = 0 WHERE is_default = 1 AND id != ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        let mut updates = vec!["updated_at = ?".to_string()];
        if update.display_name.is_some() {
            updates.push("display_name = ?".to_string());
        }
        if update.base_url.is_some() {
            updates.push("base_url = ?".to_string());
        }
        if update.username.is_some() {
            updates.push("username = ?".to_string());
        }
        if update.password.is_some() {
            updates.push("password = ?".to_string());
        }
        if update.isolated_cache.is_some() {
            updates.push("isolated_cache = ?".to_string());
        }
        if update.is_default.is_some() {
            updates.push("is_default = ?".to_string());
        }
        if update.enabled.is_some() {
            updates.push("enabled = ?".to_string());
        }

        if updates.len() == 1 {
            return self.get_upstream(id).await;
        }

        let sql = format!("UPDATE upstreams SET {} WHERE id = ?", updates.join(", "));
        let mut query = sqlx::query(&sql).bind(now.to_rfc3339());

        if let Some(v) = &update.display_name {
            query = query.bind(v);
        }
        if let Some(v) = &update.base_url {
            query = query.bind(v);
        }
        if let Some(v) = &update.username {
            query = query.bind(v.clone());
        }
        if let Some(v) = &update.password {
            query = query.bind(v.clone());
        }
        if let Some(v) = update.isolated_cache {
            query = query.bind(v);
        }
        if let Some(v) = update.is_default {
            query = query.bind(v);
        }
        if let Some(v) = update.enabled {
            query = query.bind(v);
        }

        query.bind(id).execute(&self.pool).await?;

        self.get_upstream(id).await
    }

    /// Record a failed proxy attempt against this upstream, marking it
    /// unhealthy after three consecutive failures.
    pub async fn record_upstream_failure(&self, id: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE upstreams
            SET consecutive_failures = consecutive_failures + 1,
                healthy = CASE WHEN consecutive_failures + 1 >= 3 THEN 0 ELSE healthy END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset the failure counter and mark an upstream healthy again after a
    /// successful proxy fetch.
    pub async fn record_upstream_success(&self, id: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE upstreams
            SET consecutive_failures = 0, healthy = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an upstream along with its routes
    pub async fn delete_upstream(&self, id: i64) -> Result<bool, DbError> {
        sqlx::query("DELETE FROM upstream_routes WHERE upstream_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM upstreams WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Upstream route operations ====================

    /// Insert a new routing rule
    pub async fn insert_upstream_route(
        &self,
        route: NewUpstreamRoute,
    ) -> Result<UpstreamRoute, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO upstream_routes (upstream_id, pattern, priority, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(route.upstream_id)
        .bind(&route.pattern)
        .bind(route.priority)
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = result.get("id");

        Ok(UpstreamRoute {
            id,
            upstream_id: route.upstream_id,
            pattern: route.pattern,
            priority: route.priority,
            created_at: now,
        })
    }

    /// List routes for a single upstream, lowest priority first
    pub async fn get_upstream_routes(
        &self,
        upstream_id: i64,
    ) -> Result<Vec<UpstreamRoute>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, upstream_id, pattern, priority, created_at
            FROM upstream_routes
            WHERE upstream_id = ?
            ORDER BY priority ASC
            "#,
        )
        .bind(upstream_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_route).collect())
    }

    /// List every routing rule across all upstreams, used to build the
    /// route matcher at startup.
    pub async fn list_upstream_routes(&self) -> Result<Vec<UpstreamRoute>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, upstream_id, pattern, priority, created_at
            FROM upstream_routes
            ORDER BY priority ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_route).collect())
    }

    /// Delete a single routing rule
    pub async fn delete_upstream_route(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM upstream_routes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
