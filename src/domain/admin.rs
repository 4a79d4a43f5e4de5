//! Admin account and GUI session models

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Control-plane operator account. Global, not application-scoped.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdminAccount {
    pub id: StringUuid,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub two_fa_enabled: bool,
    pub two_fa_method: Option<String>,
    #[serde(skip_serializing)]
    pub two_fa_secret: Option<String>,
    #[serde(skip_serializing)]
    pub two_fa_recovery_codes: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAdminAccountInput {
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8))]
    pub password: String,
}

/// Session payload stored in the KV store under `admin:session:{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSession {
    pub admin_id: StringUuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}
