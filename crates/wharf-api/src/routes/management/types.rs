//! Request and response types for the management API.

use serde::{Deserialize, Serialize};

// ==================== Auth ====================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
}

// ==================== Users ====================

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

// ==================== Cache ====================

#[derive(Serialize)]
pub struct CacheEntryResponse {
    pub name: String,
    pub tag: String,
    pub digest: String,
    pub size: i64,
    pub cached_at: String,
    pub last_accessed: String,
    pub source_registry: String,
}

#[derive(Serialize)]
pub struct CacheStatsResponse {
    pub total_size: i64,
    pub max_size: i64,
    pub item_count: usize,
    pub updated_at: String,
    pub items: Vec<CacheEntryResponse>,
}

// ==================== Upstreams ====================

#[derive(Deserialize)]
pub struct CreateUpstreamRequest {
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub isolated_cache: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub routes: Vec<CreateRouteRequest>,
}

#[derive(Deserialize)]
pub struct UpdateUpstreamRequest {
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub isolated_cache: Option<bool>,
    pub is_default: Option<bool>,
    pub enabled: Option<bool>,
}

#[derive(Serialize)]
pub struct UpstreamResponse {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub isolated_cache: bool,
    pub is_default: bool,
    pub enabled: bool,
    pub healthy: bool,
    pub consecutive_failures: i64,
    pub has_credentials: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Deserialize)]
pub struct CreateRouteRequest {
    pub pattern: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Serialize)]
pub struct UpstreamRouteResponse {
    pub id: i64,
    pub upstream_id: i64,
    pub pattern: String,
    pub priority: i32,
    pub created_at: String,
}

#[derive(Deserialize)]
pub struct TestUpstreamRequest {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct TestUpstreamResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct UpstreamHealthResponse {
    pub upstream_id: i64,
    pub name: String,
    pub healthy: bool,
}

// ==================== Config ====================

#[derive(Serialize)]
pub struct ConfigFileResponse {
    pub content: String,
}

#[derive(Deserialize)]
pub struct UpdateConfigFileRequest {
    pub content: String,
}

// ==================== Activity log ====================

#[derive(Deserialize, Default)]
pub struct ActivityLogsQuery {
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub user_id: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct ActivityLogResponse {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub details: Option<String>,
}

#[derive(Serialize)]
pub struct ActivityLogsListResponse {
    pub logs: Vec<ActivityLogResponse>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

// ==================== Scan gate ====================

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub reason: Option<String>,
    #[serde(default)]
    pub decided_by: Option<String>,
    pub expires_in_days: Option<i64>,
}
