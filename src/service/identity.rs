//! Identity service
//!
//! Registration, login, token refresh and rotation, logout, password
//! recovery, email verification, profile mutations, and account deletion.
//! Ephemeral state lives in the KV store; durable records go through the
//! repositories. Logout and activity logging are best-effort.

use crate::crypto::{generate_token, hash_password, verify_password};
use crate::domain::{
    validate_password_strength, CreateUserInput, EmailType, EventType, StringUuid, TwoFaMethod,
    UpdateProfileInput, User, UserProfile,
};
use crate::error::{AppError, Result};
use crate::jwt::{TokenService, TOKEN_TYPE_REFRESH};
use crate::kv::{token_digest, KvOperations};
use crate::middleware::rate_limit::RateLimiter;
use crate::repository::{ApplicationRepository, FederatedIdentityRepository, UserRepository};
use crate::service::activity::{ActivityLogEngine, EventMeta};
use crate::service::email::EmailSender;
use crate::service::rbac::RbacService;
use crate::service::two_factor::TwoFactorService;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use validator::ValidateEmail;

pub const EMAIL_VERIFY_TTL_SECS: u64 = 86_400;
pub const PASSWORD_RESET_TTL_SECS: u64 = 3_600;

/// Freshly minted token pair
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Result of a credential login
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Credentials accepted; tokens issued. `requires_two_fa_setup` is set
    /// when the application mandates 2FA and the user has not enrolled yet.
    Success {
        tokens: TokenPair,
        requires_two_fa_setup: bool,
    },
    /// A second factor is required before tokens are issued
    TwoFaRequired {
        temp_token: String,
        method: TwoFaMethod,
    },
}

pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    applications: Arc<dyn ApplicationRepository>,
    federated: Arc<dyn FederatedIdentityRepository>,
    kv: Arc<dyn KvOperations>,
    tokens: TokenService,
    rbac: Arc<RbacService>,
    two_factor: Arc<TwoFactorService>,
    email: Arc<dyn EmailSender>,
    activity: Arc<ActivityLogEngine>,
    rate_limiter: RateLimiter,
    frontend_url: Option<String>,
}

impl IdentityService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        applications: Arc<dyn ApplicationRepository>,
        federated: Arc<dyn FederatedIdentityRepository>,
        kv: Arc<dyn KvOperations>,
        tokens: TokenService,
        rbac: Arc<RbacService>,
        two_factor: Arc<TwoFactorService>,
        email: Arc<dyn EmailSender>,
        activity: Arc<ActivityLogEngine>,
        rate_limiter: RateLimiter,
        frontend_url: Option<String>,
    ) -> Self {
        Self {
            users,
            applications,
            federated,
            kv,
            tokens,
            rbac,
            two_factor,
            email,
            activity,
            rate_limiter,
            frontend_url,
        }
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    fn link(&self, path_and_query: &str) -> String {
        match &self.frontend_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path_and_query),
            None => path_and_query.to_string(),
        }
    }

    // ==================== Registration ====================

    pub async fn register(
        &self,
        app_id: StringUuid,
        email: &str,
        password: &str,
        meta: EventMeta,
    ) -> Result<UserProfile> {
        if !email.validate_email() {
            return Err(AppError::BadRequest("Invalid email address".to_string()));
        }
        validate_password_strength(password)
            .map_err(|e| {
                AppError::BadRequest(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Invalid password".to_string()),
                )
            })?;

        let password_hash = hash_password(password)?;
        let user = self
            .users
            .create(&CreateUserInput {
                app_id,
                email: email.to_lowercase(),
                password_hash,
                email_verified: false,
                first_name: None,
                last_name: None,
                picture: None,
                locale: None,
            })
            .await?;

        // Every user starts as a member; a missing system role is logged,
        // not fatal
        if let Err(e) = self.rbac.assign_role_by_name(app_id, user.id, "member").await {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to assign default role");
        }

        self.send_verification_email(app_id, user.id, &user.email).await?;

        let mut meta = meta;
        meta.user_id = Some(user.id);
        self.activity.record(EventType::Register, meta);

        Ok(user.into())
    }

    async fn send_verification_email(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        email: &str,
    ) -> Result<()> {
        let token = generate_token();
        self.kv
            .store_email_verification(app_id, &token, user_id, EMAIL_VERIFY_TTL_SECS)
            .await?;

        let mut variables = HashMap::new();
        variables.insert("email".to_string(), email.to_string());
        variables.insert("token".to_string(), token.clone());
        variables.insert(
            "verification_url".to_string(),
            self.link(&format!("/verify-email?token={}", token)),
        );
        self.email
            .send(Some(app_id), EmailType::EmailVerification, email, &variables)
            .await
    }

    // ==================== Login ====================

    pub async fn login(
        &self,
        app_id: StringUuid,
        email: &str,
        password: &str,
        meta: EventMeta,
    ) -> Result<LoginOutcome> {
        let app = self
            .applications
            .find_by_id(app_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Application not found".to_string()))?;

        let user = self
            .users
            .find_by_email(app_id, &email.to_lowercase())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

        if !user.has_password() || !verify_password(password, &user.password_hash)? {
            metrics::counter!("authgate_logins_total", "outcome" => "failed").increment(1);
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }
        if !user.email_verified {
            return Err(AppError::Forbidden("Email not verified".to_string()));
        }

        // The caller proved who they are; forget their failed attempts
        if !meta.ip.as_deref().unwrap_or("").is_empty() {
            self.rate_limiter
                .clear("login", meta.ip.as_deref().unwrap_or(""))
                .await;
        }
        if let Err(e) = self.users.touch_last_login(user.id).await {
            tracing::debug!(error = %e, "Failed to update last_login_at");
        }

        // An enrolled user is always challenged, even if the application
        // has since turned 2FA off; anything else would let a config change
        // silently bypass the second factor
        if user.two_fa_enabled {
            let challenge = self.two_factor.start_login_challenge(app_id, &user).await?;
            return Ok(LoginOutcome::TwoFaRequired {
                temp_token: challenge.temp_token,
                method: challenge.method,
            });
        }

        let tokens = self.issue_tokens(app_id, user.id).await?;
        metrics::counter!("authgate_logins_total", "outcome" => "success").increment(1);

        let mut meta = meta;
        meta.user_id = Some(user.id);
        self.activity.record(EventType::Login, meta);

        // The client is told to enroll when the application mandates 2FA
        let requires_two_fa_setup = app.two_fa_required && !user.two_fa_enabled;
        Ok(LoginOutcome::Success {
            tokens,
            requires_two_fa_setup,
        })
    }

    /// Second step of a 2FA login: the temp session plus a code or a
    /// recovery code yields an ordinary token pair.
    pub async fn complete_two_fa_login(
        &self,
        app_id: StringUuid,
        temp_token: &str,
        code: Option<&str>,
        recovery_code: Option<&str>,
        meta: EventMeta,
    ) -> Result<TokenPair> {
        let user_id = self
            .two_factor
            .verify_login(app_id, temp_token, code, recovery_code, meta.clone())
            .await?;

        let tokens = self.issue_tokens(app_id, user_id).await?;
        metrics::counter!("authgate_logins_total", "outcome" => "success").increment(1);

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::Login, meta);
        Ok(tokens)
    }

    /// Start a 2FA challenge on behalf of another login flow (federated
    /// login mirrors the password path)
    pub async fn two_factor_challenge(
        &self,
        app_id: StringUuid,
        user: &User,
    ) -> Result<crate::service::two_factor::LoginChallenge> {
        self.two_factor.start_login_challenge(app_id, user).await
    }

    /// Mint an access/refresh pair and store the refresh token hash.
    /// Shared by password login, 2FA completion, and federated login.
    pub async fn issue_tokens(&self, app_id: StringUuid, user_id: StringUuid) -> Result<TokenPair> {
        let roles = self.rbac.role_names(app_id, user_id).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Role resolution failed, minting token without roles");
            vec![]
        });

        let access_token = self.tokens.mint_access(user_id, app_id, roles)?;
        let refresh_token = self.tokens.mint_refresh(user_id, app_id)?;

        self.kv
            .store_refresh_token(
                app_id,
                user_id,
                &token_digest(&refresh_token),
                self.tokens.refresh_ttl_secs() as u64,
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.tokens.access_ttl_secs(),
        })
    }

    // ==================== Refresh rotation ====================

    pub async fn refresh(&self, presented: &str, meta: EventMeta) -> Result<TokenPair> {
        let claims = self
            .tokens
            .parse(presented)
            .map_err(|_| AppError::Unauthorized("Refresh token revoked or invalid".to_string()))?;
        TokenService::ensure_type(&claims, TOKEN_TYPE_REFRESH)?;

        let user_id = claims.user_id()?;
        let app_id = claims.app_id()?;

        if self.kv.is_user_blacklisted(app_id, user_id).await? {
            return Err(AppError::Unauthorized(
                "Refresh token revoked or invalid".to_string(),
            ));
        }

        let presented_digest = token_digest(presented);
        let stored = self.kv.get_refresh_token(app_id, user_id).await?;
        match stored {
            Some(ref digest) if *digest == presented_digest => {}
            _ => {
                return Err(AppError::Unauthorized(
                    "Refresh token revoked or invalid".to_string(),
                ))
            }
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Refresh token revoked or invalid".to_string()))?;
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }

        // Rotation: the new pair replaces the stored hash, and the old
        // token is denied for its remaining lifetime
        let pair = self.issue_tokens(app_id, user_id).await?;
        self.kv
            .blacklist_token(app_id, &presented_digest, claims.remaining_ttl_secs())
            .await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::TokenRefresh, meta);

        Ok(pair)
    }

    // ==================== Logout ====================

    /// Best-effort revocation of the presented tokens. Failures are logged
    /// and never propagated.
    pub async fn logout(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        access_digest: &str,
        access_remaining_secs: u64,
        refresh_token: Option<&str>,
        meta: EventMeta,
    ) {
        if let Some(refresh) = refresh_token {
            if let Ok(claims) = self.tokens.parse(refresh) {
                if TokenService::ensure_type(&claims, TOKEN_TYPE_REFRESH).is_ok() {
                    if let Err(e) = self
                        .kv
                        .blacklist_token(app_id, &token_digest(refresh), claims.remaining_ttl_secs())
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to blacklist refresh token on logout");
                    }
                }
            }
        }
        if let Err(e) = self.kv.delete_refresh_token(app_id, user_id).await {
            tracing::warn!(error = %e, "Failed to delete stored refresh token on logout");
        }

        if let Err(e) = self
            .kv
            .blacklist_token(app_id, access_digest, access_remaining_secs)
            .await
        {
            tracing::warn!(error = %e, "Failed to blacklist access token on logout");
        }

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::Logout, meta);
    }

    /// Deny every outstanding token of a user: the user blacklist outlives
    /// the longest-lived refresh token, and the stored refresh is dropped.
    pub async fn revoke_all_user_tokens(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.kv
            .blacklist_user(app_id, user_id, self.tokens.refresh_ttl_secs() as u64)
            .await?;
        self.kv.delete_refresh_token(app_id, user_id).await?;
        Ok(())
    }

    // ==================== Email verification ====================

    pub async fn verify_email(&self, app_id: StringUuid, token: &str, meta: EventMeta) -> Result<()> {
        let user_id = self
            .kv
            .take_email_verification(app_id, token)
            .await?
            .and_then(|raw| StringUuid::parse_str(&raw).ok())
            .ok_or_else(|| {
                AppError::BadRequest("Invalid or expired verification token".to_string())
            })?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        self.users.set_email_verified(user_id, true).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::EmailVerify, meta);

        // Welcome mail is a courtesy, not a requirement
        let mut variables = HashMap::new();
        variables.insert("email".to_string(), user.email.clone());
        variables.insert(
            "first_name".to_string(),
            user.first_name.clone().unwrap_or_else(|| "there".to_string()),
        );
        if let Err(e) = self
            .email
            .send(Some(app_id), EmailType::Welcome, &user.email, &variables)
            .await
        {
            tracing::warn!(error = %e, "Failed to send welcome email");
        }

        Ok(())
    }

    // ==================== Password recovery ====================

    /// Always answers generically so the caller cannot probe which emails
    /// exist.
    pub async fn forgot_password(&self, app_id: StringUuid, email: &str) -> Result<()> {
        let Some(user) = self.users.find_by_email(app_id, &email.to_lowercase()).await? else {
            return Ok(());
        };

        let token = generate_token();
        self.kv
            .store_password_reset(app_id, &token, user.id, PASSWORD_RESET_TTL_SECS)
            .await?;

        let mut variables = HashMap::new();
        variables.insert("email".to_string(), user.email.clone());
        variables.insert("token".to_string(), token.clone());
        variables.insert(
            "reset_url".to_string(),
            self.link(&format!("/reset-password?token={}", token)),
        );
        self.email
            .send(Some(app_id), EmailType::PasswordReset, &user.email, &variables)
            .await
    }

    pub async fn reset_password(
        &self,
        app_id: StringUuid,
        token: &str,
        new_password: &str,
        meta: EventMeta,
    ) -> Result<()> {
        validate_password_strength(new_password)
            .map_err(|e| {
                AppError::BadRequest(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Invalid password".to_string()),
                )
            })?;

        let user_id = self
            .kv
            .take_password_reset(app_id, token)
            .await?
            .and_then(|raw| StringUuid::parse_str(&raw).ok())
            .ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".to_string()))?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        self.users
            .update_password(user_id, &hash_password(new_password)?)
            .await?;
        self.revoke_all_user_tokens(app_id, user_id).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::PasswordReset, meta);

        self.notify_password_changed(app_id, &user.email).await;
        Ok(())
    }

    pub async fn change_password(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        current_password: &str,
        new_password: &str,
        meta: EventMeta,
    ) -> Result<()> {
        validate_password_strength(new_password)
            .map_err(|e| {
                AppError::BadRequest(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Invalid password".to_string()),
                )
            })?;

        let user = self.load_user(app_id, user_id).await?;
        if user.has_password() && !verify_password(current_password, &user.password_hash)? {
            return Err(AppError::Unauthorized("Invalid password".to_string()));
        }

        self.users
            .update_password(user_id, &hash_password(new_password)?)
            .await?;
        self.revoke_all_user_tokens(app_id, user_id).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::PasswordChange, meta);

        self.notify_password_changed(app_id, &user.email).await;
        Ok(())
    }

    async fn notify_password_changed(&self, app_id: StringUuid, email: &str) {
        let mut variables = HashMap::new();
        variables.insert("email".to_string(), email.to_string());
        if let Err(e) = self
            .email
            .send(Some(app_id), EmailType::PasswordChanged, email, &variables)
            .await
        {
            tracing::warn!(error = %e, "Failed to send password-changed notification");
        }
    }

    // ==================== Profile ====================

    async fn load_user(&self, app_id: StringUuid, user_id: StringUuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.app_id == app_id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn get_profile(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        meta: EventMeta,
    ) -> Result<UserProfile> {
        let user = self.load_user(app_id, user_id).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::ProfileAccess, meta);

        Ok(user.into())
    }

    pub async fn update_profile(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        input: &UpdateProfileInput,
        meta: EventMeta,
    ) -> Result<UserProfile> {
        if input.is_empty() {
            return Err(AppError::BadRequest("No fields to update".to_string()));
        }
        self.load_user(app_id, user_id).await?;

        let user = self.users.update_profile(user_id, input).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::ProfileUpdate, meta);

        Ok(user.into())
    }

    /// Changing the address drops the verification flag and starts a fresh
    /// verification round-trip.
    pub async fn change_email(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        new_email: &str,
        password: Option<&str>,
        meta: EventMeta,
    ) -> Result<()> {
        if !new_email.validate_email() {
            return Err(AppError::BadRequest("Invalid email address".to_string()));
        }
        let user = self.load_user(app_id, user_id).await?;

        if user.has_password() {
            let password =
                password.ok_or_else(|| AppError::BadRequest("Password is required".to_string()))?;
            if !verify_password(password, &user.password_hash)? {
                return Err(AppError::Unauthorized("Invalid password".to_string()));
            }
        }

        let new_email = new_email.to_lowercase();
        self.users.update_email(user_id, &new_email).await?;
        self.send_verification_email(app_id, user_id, &new_email).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(EventType::EmailChange, meta);
        Ok(())
    }

    // ==================== Account deletion ====================

    pub async fn delete_account(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        password: Option<&str>,
        confirm_deletion: bool,
        meta: EventMeta,
    ) -> Result<()> {
        if !confirm_deletion {
            return Err(AppError::BadRequest(
                "Account deletion must be confirmed".to_string(),
            ));
        }
        let user = self.load_user(app_id, user_id).await?;

        if user.has_password() {
            let password =
                password.ok_or_else(|| AppError::BadRequest("Password is required".to_string()))?;
            if !verify_password(password, &user.password_hash)? {
                return Err(AppError::Unauthorized("Invalid password".to_string()));
            }
        }

        self.revoke_all_user_tokens(app_id, user_id).await?;
        self.activity.delete_user_logs(user_id).await?;
        self.federated.delete_by_user(user_id).await?;
        self.users.delete(user_id).await?;

        // The deletion record outlives the user row, so it carries the old
        // ID in the details blob instead of a reference
        let mut meta = meta;
        meta.user_id = None;
        meta.details = Some(serde_json::json!({
            "deleted_user_id": user_id.to_string(),
            "email": user.email,
        }));
        self.activity.record(EventType::AccountDeletion, meta);
        Ok(())
    }
}
