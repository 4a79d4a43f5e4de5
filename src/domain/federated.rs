//! Federated identity models and provider-normalized profiles

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, Row};

/// External identity providers this service understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
    Facebook,
    Apple,
    #[serde(untagged)]
    Other(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
            Provider::Facebook => "facebook",
            Provider::Apple => "apple",
            Provider::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "google" => Provider::Google,
            "github" => Provider::Github,
            "facebook" => Provider::Facebook,
            "apple" => Provider::Apple,
            other => Provider::Other(other.to_string()),
        }
    }

    /// Providers that assert verified email addresses
    pub fn asserts_verified_email(&self) -> bool {
        matches!(self, Provider::Google | Provider::Apple)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record linking a user to an external identity provider account.
/// Unique per `(app_id, provider, provider_user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub id: StringUuid,
    pub user_id: StringUuid,
    pub app_id: StringUuid,
    pub provider: String,
    pub provider_user_id: String,
    /// Opaque provider-specific payload kept for audit
    pub provider_profile: Option<serde_json::Value>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Manual FromRow: NULL JSON columns need the Option<Json<Value>> detour.
impl<'r> FromRow<'r, MySqlRow> for FederatedIdentity {
    fn from_row(row: &'r MySqlRow) -> sqlx::Result<Self> {
        let profile: Option<sqlx::types::Json<serde_json::Value>> =
            row.try_get("provider_profile")?;
        Ok(FederatedIdentity {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            app_id: row.try_get("app_id")?,
            provider: row.try_get("provider")?,
            provider_user_id: row.try_get("provider_user_id")?,
            provider_profile: profile.map(|w| w.0),
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Provider-normalized profile handed to the external identity adapter by
/// the provider gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub provider: Provider,
    pub provider_user_id: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    /// Provider-specific raw payload, stored opaque
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// The OAuth `state` parameter: base64-url-encoded JSON carried through the
/// provider round-trip. Rejected when stale or when the redirect target is
/// not allow-listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub app_id: StringUuid,
    pub redirect_uri: String,
    pub nonce: String,
    /// Unix timestamp at mint time
    pub timestamp: i64,
}

impl OAuthState {
    pub fn encode(&self) -> String {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).expect("state serializes"))
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Age check against `max_age_secs` (default one hour)
    pub fn is_fresh(&self, now_ts: i64, max_age_secs: i64) -> bool {
        let age = now_ts - self.timestamp;
        (0..=max_age_secs).contains(&age)
    }

    /// The redirect host must equal an allow-listed domain or be a
    /// subdomain of one.
    pub fn redirect_allowed(&self, allowed_domains: &[String]) -> bool {
        let Ok(parsed) = url::Url::parse(&self.redirect_uri) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        allowed_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }
}

#[derive(Debug, Clone)]
pub struct CreateFederatedIdentityInput {
    pub user_id: StringUuid,
    pub app_id: StringUuid,
    pub provider: String,
    pub provider_user_id: String,
    pub provider_profile: serde_json::Value,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RefreshFederatedIdentityInput {
    pub provider_profile: serde_json::Value,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_roundtrip() {
        assert_eq!(Provider::parse("google"), Provider::Google);
        assert_eq!(Provider::parse("github"), Provider::Github);
        assert_eq!(
            Provider::parse("gitlab"),
            Provider::Other("gitlab".to_string())
        );
        assert_eq!(Provider::parse("google").as_str(), "google");
    }

    #[test]
    fn test_verified_email_assertion() {
        assert!(Provider::Google.asserts_verified_email());
        assert!(Provider::Apple.asserts_verified_email());
        assert!(!Provider::Github.asserts_verified_email());
        assert!(!Provider::Other("gitlab".to_string()).asserts_verified_email());
    }

    #[test]
    fn test_oauth_state_roundtrip() {
        let state = OAuthState {
            app_id: StringUuid::new_v4(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            nonce: "nonce-1".to_string(),
            timestamp: 1_700_000_000,
        };
        let decoded = OAuthState::decode(&state.encode()).unwrap();
        assert_eq!(decoded.app_id, state.app_id);
        assert_eq!(decoded.redirect_uri, state.redirect_uri);
        assert_eq!(decoded.nonce, "nonce-1");
    }

    #[test]
    fn test_oauth_state_freshness() {
        let state = OAuthState {
            app_id: StringUuid::new_v4(),
            redirect_uri: "https://app.example.com/cb".to_string(),
            nonce: "n".to_string(),
            timestamp: 1_000,
        };
        assert!(state.is_fresh(1_000 + 3599, 3600));
        assert!(!state.is_fresh(1_000 + 3601, 3600));
        // Timestamps from the future are rejected too
        assert!(!state.is_fresh(999, 3600));
    }

    #[test]
    fn test_oauth_state_redirect_allowlist() {
        let allowed = vec!["example.com".to_string()];
        let mk = |uri: &str| OAuthState {
            app_id: StringUuid::new_v4(),
            redirect_uri: uri.to_string(),
            nonce: "n".to_string(),
            timestamp: 0,
        };
        assert!(mk("https://example.com/cb").redirect_allowed(&allowed));
        assert!(mk("https://app.example.com/cb").redirect_allowed(&allowed));
        assert!(!mk("https://evilexample.com/cb").redirect_allowed(&allowed));
        assert!(!mk("https://example.com.evil.io/cb").redirect_allowed(&allowed));
        assert!(!mk("not a url").redirect_allowed(&allowed));
    }

    #[test]
    fn test_oauth_state_decode_garbage() {
        assert!(OAuthState::decode("%%%").is_none());
        assert!(OAuthState::decode("bm90LWpzb24").is_none());
    }

    #[test]
    fn test_normalized_profile_deserialization() {
        let json = r#"{
            "provider": "google",
            "provider_user_id": "g-123",
            "email": "alice@example.com",
            "email_verified": true,
            "name": "Alice",
            "first_name": "Alice",
            "last_name": null,
            "picture": null,
            "locale": "en",
            "raw": {"sub": "g-123"}
        }"#;
        let profile: NormalizedProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.provider, Provider::Google);
        assert!(profile.email_verified);
        assert_eq!(profile.raw["sub"], "g-123");
    }
}
