//! Ambient database models: users, upstream routing config, activity log.
//!
//! Deliberately excludes anything content-addressed (blobs, manifests,
//! cache entries) — that state lives in the filesystem core, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    Admin,
    ReadWrite,
    ReadOnly,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::ReadWrite => "read-write",
            UserRole::ReadOnly => "read-only",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "read-write" => Some(UserRole::ReadWrite),
            "read-only" => Some(UserRole::ReadOnly),
            _ => None,
        }
    }

    pub fn can_write(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::ReadWrite)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserRole::from_str(s).ok_or_else(|| format!("invalid role: {s}"))
    }
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New user (for insertion)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// A configured upstream registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub isolated_cache: bool,
    pub is_default: bool,
    pub enabled: bool,
    pub healthy: bool,
    pub consecutive_failures: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUpstream {
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub isolated_cache: bool,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUpstream {
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub username: Option<Option<String>>,
    pub password: Option<Option<String>>,
    pub isolated_cache: Option<bool>,
    pub is_default: Option<bool>,
    pub enabled: Option<bool>,
}

/// A glob-style routing rule selecting which upstream serves a repository
/// path. Lower `priority` wins; evaluated in ascending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamRoute {
    pub id: i64,
    pub upstream_id: i64,
    pub pattern: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUpstreamRoute {
    pub upstream_id: i64,
    pub pattern: String,
    pub priority: i32,
}

/// Append-only audit trail entry for admin mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewActivityLogEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub details: Option<String>,
}
