//! Activity log domain: event types, severity tiers, and records

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, Row};

/// Severity tier controlling retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Important,
    Informational,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Important => "IMPORTANT",
            Severity::Informational => "INFORMATIONAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(Severity::Critical),
            "IMPORTANT" => Some(Severity::Important),
            "INFORMATIONAL" => Some(Severity::Informational),
            _ => None,
        }
    }
}

/// Every recordable event, with a static severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // CRITICAL
    Login,
    Logout,
    Register,
    PasswordChange,
    PasswordReset,
    EmailChange,
    #[serde(rename = "2FA_ENABLE")]
    TwoFaEnable,
    #[serde(rename = "2FA_DISABLE")]
    TwoFaDisable,
    AccountDeletion,
    RecoveryCodeUsed,
    // IMPORTANT
    EmailVerify,
    #[serde(rename = "2FA_LOGIN")]
    TwoFaLogin,
    SocialLogin,
    ProfileUpdate,
    RecoveryCodeGenerate,
    // INFORMATIONAL
    TokenRefresh,
    ProfileAccess,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "LOGIN",
            EventType::Logout => "LOGOUT",
            EventType::Register => "REGISTER",
            EventType::PasswordChange => "PASSWORD_CHANGE",
            EventType::PasswordReset => "PASSWORD_RESET",
            EventType::EmailChange => "EMAIL_CHANGE",
            EventType::TwoFaEnable => "2FA_ENABLE",
            EventType::TwoFaDisable => "2FA_DISABLE",
            EventType::AccountDeletion => "ACCOUNT_DELETION",
            EventType::RecoveryCodeUsed => "RECOVERY_CODE_USED",
            EventType::EmailVerify => "EMAIL_VERIFY",
            EventType::TwoFaLogin => "2FA_LOGIN",
            EventType::SocialLogin => "SOCIAL_LOGIN",
            EventType::ProfileUpdate => "PROFILE_UPDATE",
            EventType::RecoveryCodeGenerate => "RECOVERY_CODE_GENERATE",
            EventType::TokenRefresh => "TOKEN_REFRESH",
            EventType::ProfileAccess => "PROFILE_ACCESS",
        }
    }

    /// Static severity classification
    pub fn severity(&self) -> Severity {
        match self {
            EventType::Login
            | EventType::Logout
            | EventType::Register
            | EventType::PasswordChange
            | EventType::PasswordReset
            | EventType::EmailChange
            | EventType::TwoFaEnable
            | EventType::TwoFaDisable
            | EventType::AccountDeletion
            | EventType::RecoveryCodeUsed => Severity::Critical,
            EventType::EmailVerify
            | EventType::TwoFaLogin
            | EventType::SocialLogin
            | EventType::ProfileUpdate
            | EventType::RecoveryCodeGenerate => Severity::Important,
            EventType::TokenRefresh | EventType::ProfileAccess => Severity::Informational,
        }
    }
}

/// Persisted activity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: StringUuid,
    pub app_id: StringUuid,
    pub user_id: Option<StringUuid>,
    pub event_type: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
    pub is_anomaly: bool,
}

// Manual FromRow: the derive trips over NULL JSON columns, so `details` is
// read through Option<Json<Value>>.
impl<'r> FromRow<'r, MySqlRow> for ActivityLog {
    fn from_row(row: &'r MySqlRow) -> sqlx::Result<Self> {
        let details: Option<sqlx::types::Json<serde_json::Value>> = row.try_get("details")?;
        Ok(ActivityLog {
            id: row.try_get("id")?,
            app_id: row.try_get("app_id")?,
            user_id: row.try_get("user_id")?,
            event_type: row.try_get("event_type")?,
            severity: row.try_get("severity")?,
            timestamp: row.try_get("timestamp")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            details: details.map(|w| w.0),
            expires_at: row.try_get("expires_at")?,
            is_anomaly: row.try_get("is_anomaly")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateActivityLogInput {
    pub app_id: StringUuid,
    pub user_id: Option<StringUuid>,
    pub event_type: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
    pub is_anomaly: bool,
}

/// Query parameters for the admin activity-log listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityLogQuery {
    pub app_id: Option<StringUuid>,
    pub user_id: Option<StringUuid>,
    pub event_type: Option<String>,
    pub severity: Option<String>,
    pub is_anomaly: Option<bool>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(EventType::Login.severity(), Severity::Critical);
        assert_eq!(EventType::RecoveryCodeUsed.severity(), Severity::Critical);
        assert_eq!(EventType::EmailVerify.severity(), Severity::Important);
        assert_eq!(EventType::SocialLogin.severity(), Severity::Important);
        assert_eq!(EventType::TokenRefresh.severity(), Severity::Informational);
        assert_eq!(EventType::ProfileAccess.severity(), Severity::Informational);
    }

    #[test]
    fn test_event_wire_names() {
        assert_eq!(EventType::TwoFaEnable.as_str(), "2FA_ENABLE");
        assert_eq!(EventType::TwoFaLogin.as_str(), "2FA_LOGIN");
        assert_eq!(EventType::PasswordChange.as_str(), "PASSWORD_CHANGE");
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::parse("IMPORTANT"), Some(Severity::Important));
        assert_eq!(
            Severity::parse("INFORMATIONAL"),
            Some(Severity::Informational)
        );
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn test_event_type_serde_matches_as_str() {
        let json = serde_json::to_string(&EventType::TwoFaEnable).unwrap();
        assert_eq!(json, "\"2FA_ENABLE\"");
        let json = serde_json::to_string(&EventType::TokenRefresh).unwrap();
        assert_eq!(json, "\"TOKEN_REFRESH\"");
    }
}
