//! Bearer token minting and parsing
//!
//! Two token variants are issued over a symmetric signer: short-lived
//! access tokens and long-lived refresh tokens. Consumers enforce
//! `token_type` at the call site; an empty type is accepted for tokens
//! minted before the discriminator existed.

use crate::config::JwtConfig;
use crate::domain::StringUuid;
use crate::error::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Claims carried by both token variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Application the token was issued for
    pub app_id: String,
    /// Token type discriminator (prevents token confusion). Empty for
    /// legacy tokens.
    #[serde(default)]
    pub token_type: String,
    /// Pre-resolved roles (access tokens only; may be empty)
    #[serde(default)]
    pub roles: Vec<String>,
    /// Issuer
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<StringUuid> {
        StringUuid::parse_str(&self.sub)
            .map_err(|_| AppError::Unauthorized("Invalid user ID in token".to_string()))
    }

    pub fn app_id(&self) -> Result<StringUuid> {
        StringUuid::parse_str(&self.app_id)
            .map_err(|_| AppError::Unauthorized("Invalid application ID in token".to_string()))
    }

    /// Seconds until expiry, clamped at zero
    pub fn remaining_ttl_secs(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(0) as u64
    }
}

/// Token minting and verification
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    /// Build the service. Fails when the signing secret is shorter than 32
    /// bytes.
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.len() < 32 {
            return Err(AppError::Internal(anyhow::anyhow!(
                "JWT signing secret must be at least 32 bytes"
            )));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        })
    }

    /// Strict leeway (5 seconds) instead of the default 60 so tokens
    /// expire promptly while tolerating minor clock skew.
    fn strict_validation(&self) -> Validation {
        let mut v = Validation::new(Algorithm::HS256);
        v.leeway = 5;
        v.set_issuer(&[&self.issuer]);
        v
    }

    fn mint(
        &self,
        user_id: StringUuid,
        app_id: StringUuid,
        token_type: &str,
        roles: Vec<String>,
        ttl_secs: i64,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(ttl_secs);
        let claims = Claims {
            sub: user_id.to_string(),
            app_id: app_id.to_string(),
            token_type: token_type.to_string(),
            roles,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(e.into()))
    }

    /// Mint an access token carrying the user's resolved roles
    pub fn mint_access(
        &self,
        user_id: StringUuid,
        app_id: StringUuid,
        roles: Vec<String>,
    ) -> Result<String> {
        self.mint(user_id, app_id, TOKEN_TYPE_ACCESS, roles, self.access_ttl_secs)
    }

    /// Mint a refresh token
    pub fn mint_refresh(&self, user_id: StringUuid, app_id: StringUuid) -> Result<String> {
        self.mint(
            user_id,
            app_id,
            TOKEN_TYPE_REFRESH,
            vec![],
            self.refresh_ttl_secs,
        )
    }

    /// Verify signature, expiry, and issuer; returns the claims
    pub fn parse(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.strict_validation())?;
        Ok(data.claims)
    }

    /// Enforce the token type at a consumption site. An empty stored type
    /// is accepted for backward compatibility.
    pub fn ensure_type(claims: &Claims, expected: &str) -> Result<()> {
        if claims.token_type.is_empty() || claims.token_type == expected {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "Invalid token type: expected {} token",
                expected
            )))
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl_secs
    }
}
