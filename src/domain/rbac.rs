//! RBAC domain models: roles, permissions, assignments

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// System roles seeded for every application
pub const SYSTEM_ROLES: &[&str] = &["admin", "member", "viewer"];

/// Application-scoped role. Unique per `(app_id, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: StringUuid,
    pub app_id: StringUuid,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Global permission as a `resource:action` tuple. Unique per pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: StringUuid,
    pub resource: String,
    pub action: String,
}

impl Permission {
    /// Wire form used in caches and checks
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

/// A user's role assignment inside an application
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRole {
    pub user_id: StringUuid,
    pub role_id: StringUuid,
    pub app_id: StringUuid,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<StringUuid>,
}

/// Cached resolution of a user's roles and derived permissions in one app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRolesInApp {
    pub user_id: StringUuid,
    pub app_id: StringUuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl UserRolesInApp {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let key = format!("{}:{}", resource, action);
        self.permissions.iter().any(|p| p == &key)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleInput {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRoleInput {
    pub user_id: StringUuid,
    pub role_id: StringUuid,
}
