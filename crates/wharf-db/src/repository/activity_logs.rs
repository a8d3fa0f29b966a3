//! Activity log operations

use chrono::Utc;
use sqlx::Row;

use crate::error::DbError;
use crate::models::{ActivityLogEntry, NewActivityLogEntry};
use crate::repository::Database;
use crate::utils::parse_datetime_or_now;

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> ActivityLogEntry {
    ActivityLogEntry {
        id: row.get("id"),
        timestamp: parse_datetime_or_now(row.get("timestamp")),
        action: row.get("action"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        user_id: row.get("user_id"),
        username: row.get("username"),
        details: row.get("details"),
    }
}

/// Query parameters for listing activity logs
#[derive(Debug, Clone, Default)]
pub struct ActivityLogQuery {
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub user_id: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl Database {
    /// Append an entry to the activity log
    pub async fn insert_activity_log(
        &self,
        log: NewActivityLogEntry,
    ) -> Result<ActivityLogEntry, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO activity_logs (timestamp, action, resource_type, resource_id, user_id, username, details)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(&log.action)
        .bind(&log.resource_type)
        .bind(&log.resource_id)
        .bind(log.user_id)
        .bind(&log.username)
        .bind(&log.details)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = result.get("id");

        Ok(ActivityLogEntry {
            id,
            timestamp: now,
            action: log.action,
            resource_type: log.resource_type,
            resource_id: log.resource_id,
            user_id: log.user_id,
            username: log.username,
            details: log.details,
        })
    }

    /// List activity log entries matching a filter, newest first, with the
    /// total matching count for pagination.
    pub async fn list_activity_logs(
        &self,
        query: ActivityLogQuery,
    ) -> Result<(Vec<ActivityLogEntry>, i64), DbError> {
        let mut conditions = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(action) = &query.action {
            conditions.push("action = ?");
            params.push(action.clone());
        }
        if let Some(resource_type) = &query.resource_type {
            conditions.push("resource_type = ?");
            params.push(resource_type.clone());
        }
        if let Some(user_id) = query.user_id {
            conditions.push("user_id = ?");
            params.push(user_id.to_string());
        }
        if let Some(start_date) = &query.start_date {
            conditions.push("timestamp >= ?");
            params.push(start_date.clone());
        }
        if let Some(end_date) = &query.end_date {
            conditions.push("timestamp <= ?");
            params.push(end_date.clone());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as count FROM activity_logs {where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        for param in &params {
            count_query = count_query.bind(param);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("count");

        let sql = format!(
            r#"
            SELECT id, timestamp, action, resource_type, resource_id, user_id, username, details
            FROM activity_logs
            {where_clause}
            ORDER BY timestamp DESC
            LIMIT ? OFFSET ?
            "#
        );

        let mut logs_query = sqlx::query(&sql);
        for param in &params {
            logs_query = logs_query.bind(param);
        }
        logs_query = logs_query.bind(query.limit).bind(query.offset);

        let rows = logs_query.fetch_all(&self.pool).await?;
        Ok((rows.iter().map(row_to_entry).collect(), total))
    }

    /// Drop log entries older than `days`, returning how many were removed.
    pub async fn cleanup_old_activity_logs(&self, days: i64) -> Result<u64, DbError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM activity_logs WHERE timestamp < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
