//! Activity log routes.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use wharf_db::ActivityLogQuery;

use crate::error::ApiError;
use crate::state::AppState;

use super::auth::RequireAdmin;
use super::types::{ActivityLogResponse, ActivityLogsListResponse, ActivityLogsQuery};

/// GET /api/v1/logs (Admin only)
async fn list_activity_logs(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Query(query): Query<ActivityLogsQuery>,
) -> Result<Json<ActivityLogsListResponse>, ApiError> {
    let offset = query.offset;
    let limit = query.limit.min(100);

    let db_query = ActivityLogQuery {
        action: query.action,
        resource_type: query.resource_type,
        user_id: query.user_id,
        start_date: query.start_date,
        end_date: query.end_date,
        offset,
        limit,
    };

    let (logs, total) = state.db.list_activity_logs(db_query).await?;

    let logs = logs
        .into_iter()
        .map(|log| ActivityLogResponse {
            id: log.id,
            timestamp: log.timestamp.to_rfc3339(),
            action: log.action,
            resource_type: log.resource_type,
            resource_id: log.resource_id,
            user_id: log.user_id,
            username: log.username,
            details: log.details,
        })
        .collect();

    Ok(Json(ActivityLogsListResponse { logs, total, offset, limit }))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/logs", get(list_activity_logs))
}
