//! Email template and server configuration models

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Recognized email types. Closed set; templates are keyed by the wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    EmailVerification,
    PasswordReset,
    TwoFaCode,
    Welcome,
    AccountDeactivated,
    PasswordChanged,
}

impl EmailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailType::EmailVerification => "email_verification",
            EmailType::PasswordReset => "password_reset",
            EmailType::TwoFaCode => "two_fa_code",
            EmailType::Welcome => "welcome",
            EmailType::AccountDeactivated => "account_deactivated",
            EmailType::PasswordChanged => "password_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email_verification" => Some(EmailType::EmailVerification),
            "password_reset" => Some(EmailType::PasswordReset),
            "two_fa_code" => Some(EmailType::TwoFaCode),
            "welcome" => Some(EmailType::Welcome),
            "account_deactivated" => Some(EmailType::AccountDeactivated),
            "password_changed" => Some(EmailType::PasswordChanged),
            _ => None,
        }
    }

    /// Variables the renderer recognizes for this type
    pub fn recognized_variables(&self) -> &'static [&'static str] {
        match self {
            EmailType::EmailVerification => &["app_name", "email", "verification_url", "token"],
            EmailType::PasswordReset => &["app_name", "email", "reset_url", "token"],
            EmailType::TwoFaCode => &["app_name", "email", "code"],
            EmailType::Welcome => &["app_name", "email", "first_name"],
            EmailType::AccountDeactivated => &["app_name", "email"],
            EmailType::PasswordChanged => &["app_name", "email"],
        }
    }
}

/// Stored template override, keyed `(app_id NULLABLE, email_type)`.
/// `app_id IS NULL` denotes the global default.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailTemplate {
    pub id: StringUuid,
    pub app_id: Option<StringUuid>,
    pub email_type: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub server_config_id: Option<StringUuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SMTP server configuration, keyed `(app_id NULLABLE, is_default)`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailServerConfig {
    pub id: StringUuid,
    pub app_id: Option<StringUuid>,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub from_address: String,
    pub use_tls: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertEmailTemplateInput {
    pub app_id: Option<StringUuid>,
    pub email_type: EmailType,
    #[validate(length(min = 1, max = 512))]
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub server_config_id: Option<StringUuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertEmailServerConfigInput {
    pub app_id: Option<StringUuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[validate(email)]
    pub from_address: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_type_roundtrip() {
        for t in [
            EmailType::EmailVerification,
            EmailType::PasswordReset,
            EmailType::TwoFaCode,
            EmailType::Welcome,
            EmailType::AccountDeactivated,
            EmailType::PasswordChanged,
        ] {
            assert_eq!(EmailType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EmailType::parse("newsletter"), None);
    }

    #[test]
    fn test_recognized_variables() {
        assert!(EmailType::EmailVerification
            .recognized_variables()
            .contains(&"verification_url"));
        assert!(EmailType::TwoFaCode.recognized_variables().contains(&"code"));
    }
}
