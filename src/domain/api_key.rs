//! API key domain model

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Kind of API key: admin keys authenticate the control plane, app keys
/// authenticate one application's server-to-server calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyType {
    Admin,
    App,
}

impl ApiKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyType::Admin => "admin",
            ApiKeyType::App => "app",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(ApiKeyType::Admin),
            "app" => Some(ApiKeyType::App),
            _ => None,
        }
    }
}

/// Persisted API key. The full key is never stored; lookup is by SHA-256
/// hash, `key_prefix`/`key_suffix` are display hints.
///
/// Invariant: `key_type = app` iff `app_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: StringUuid,
    pub key_type: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub key_suffix: String,
    pub app_id: Option<StringUuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn key_type(&self) -> Option<ApiKeyType> {
        ApiKeyType::parse(&self.key_type)
    }

    /// An active key is not revoked and not past its expiry
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.expires_at.map(|e| e > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyInput {
    pub key_type: ApiKeyType,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    pub app_id: Option<StringUuid>,
    pub expires_at: Option<DateTime<Utc>>,
}
