//! Application (identity realm) and OAuth provider config models

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Two-factor methods an application may offer its users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwoFaMethod {
    Totp,
    Email,
}

impl TwoFaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFaMethod::Totp => "totp",
            TwoFaMethod::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "totp" => Some(TwoFaMethod::Totp),
            "email" => Some(TwoFaMethod::Email),
            _ => None,
        }
    }
}

/// A tenant-owned identity realm. Users, roles, and policy live inside one
/// application.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: StringUuid,
    pub tenant_id: StringUuid,
    pub name: String,
    pub description: Option<String>,
    pub two_fa_enabled: bool,
    pub two_fa_required: bool,
    /// Comma-separated subset of {totp,email}
    pub two_fa_methods: String,
    pub two_fa_issuer_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Parsed two-factor method list
    pub fn methods(&self) -> Vec<TwoFaMethod> {
        self.two_fa_methods
            .split(',')
            .filter_map(|m| TwoFaMethod::parse(m.trim()))
            .collect()
    }

    pub fn allows_method(&self, method: TwoFaMethod) -> bool {
        self.methods().contains(&method)
    }

    /// Issuer shown in authenticator apps
    pub fn issuer_name(&self) -> &str {
        self.two_fa_issuer_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApplicationInput {
    pub tenant_id: StringUuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    #[serde(default)]
    pub two_fa_enabled: bool,
    #[serde(default)]
    pub two_fa_required: bool,
    #[serde(default)]
    pub two_fa_methods: Vec<TwoFaMethod>,
    pub two_fa_issuer_name: Option<String>,
}

impl CreateApplicationInput {
    /// Invariant: two_fa_required implies two_fa_enabled
    pub fn check_two_fa_invariant(&self) -> bool {
        !self.two_fa_required || self.two_fa_enabled
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateApplicationInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    pub two_fa_enabled: Option<bool>,
    pub two_fa_required: Option<bool>,
    pub two_fa_methods: Option<Vec<TwoFaMethod>>,
    pub two_fa_issuer_name: Option<String>,
}

/// Per-application OAuth provider configuration, unique per (app, provider)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OAuthProviderConfig {
    pub id: StringUuid,
    pub app_id: StringUuid,
    pub provider: String,
    pub client_id: String,
    /// Encrypted at rest when an encryption key is configured
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub redirect_url: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertOAuthConfigInput {
    #[validate(length(min = 1, max = 64))]
    pub provider: String,
    #[validate(length(min = 1, max = 512))]
    pub client_id: String,
    #[validate(length(min = 1, max = 1024))]
    pub client_secret: String,
    #[validate(url)]
    pub redirect_url: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_app(methods: &str) -> Application {
        Application {
            id: StringUuid::new_v4(),
            tenant_id: StringUuid::new_v4(),
            name: "Acme".to_string(),
            description: None,
            two_fa_enabled: true,
            two_fa_required: false,
            two_fa_methods: methods.to_string(),
            two_fa_issuer_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_methods_parsing() {
        let app = sample_app("totp,email");
        assert_eq!(app.methods(), vec![TwoFaMethod::Totp, TwoFaMethod::Email]);
        assert!(app.allows_method(TwoFaMethod::Totp));

        let app = sample_app("totp, bogus");
        assert_eq!(app.methods(), vec![TwoFaMethod::Totp]);
        assert!(!app.allows_method(TwoFaMethod::Email));
    }

    #[test]
    fn test_issuer_falls_back_to_name() {
        let mut app = sample_app("totp");
        assert_eq!(app.issuer_name(), "Acme");
        app.two_fa_issuer_name = Some("Acme Prod".to_string());
        assert_eq!(app.issuer_name(), "Acme Prod");
    }

    #[test]
    fn test_two_fa_invariant() {
        let mut input = CreateApplicationInput {
            tenant_id: StringUuid::new_v4(),
            name: "app".to_string(),
            description: None,
            two_fa_enabled: false,
            two_fa_required: true,
            two_fa_methods: vec![],
            two_fa_issuer_name: None,
        };
        assert!(!input.check_two_fa_invariant());
        input.two_fa_enabled = true;
        assert!(input.check_two_fa_invariant());
    }
}
