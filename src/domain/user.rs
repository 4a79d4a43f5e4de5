//! User domain model

use super::application::TwoFaMethod;
use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// An end user inside one application. Unique per `(app_id, email)`.
///
/// `password_hash` is empty for federated-only accounts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: StringUuid,
    pub app_id: StringUuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_verified: bool,
    pub is_active: bool,
    pub two_fa_enabled: bool,
    pub two_fa_method: Option<String>,
    #[serde(skip_serializing)]
    pub two_fa_secret: Option<String>,
    /// Opaque JSON array of one-shot recovery code hashes
    #[serde(skip_serializing)]
    pub two_fa_recovery_codes: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }

    pub fn two_fa_method(&self) -> Option<TwoFaMethod> {
        self.two_fa_method.as_deref().and_then(TwoFaMethod::parse)
    }
}

/// Public profile projection returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: StringUuid,
    pub email: String,
    pub email_verified: bool,
    pub is_active: bool,
    pub two_fa_enabled: bool,
    pub two_fa_method: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            email_verified: u.email_verified,
            is_active: u.is_active,
            two_fa_enabled: u.two_fa_enabled,
            two_fa_method: u.two_fa_method,
            first_name: u.first_name,
            last_name: u.last_name,
            picture: u.picture,
            locale: u.locale,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub app_id: StringUuid,
    pub email: String,
    /// Already-hashed password; empty for federated-only accounts
    pub password_hash: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
}

/// Allow-listed profile fields for partial update
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(max = 255))]
    pub first_name: Option<String>,
    #[validate(length(max = 255))]
    pub last_name: Option<String>,
    #[validate(url)]
    pub picture: Option<String>,
    #[validate(length(max = 16))]
    pub locale: Option<String>,
}

impl UpdateProfileInput {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.picture.is_none()
            && self.locale.is_none()
    }
}

/// Profile fields a federated login may fill into an existing user.
/// Only empty fields are overwritten.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
}

/// Persisted 2FA state written when enrollment completes
#[derive(Debug, Clone)]
pub struct TwoFaState {
    pub enabled: bool,
    pub method: Option<String>,
    pub secret: Option<String>,
    pub recovery_codes: Option<String>,
}
