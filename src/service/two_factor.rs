//! Two-factor authentication
//!
//! TOTP (SHA1, 6 digits, 30s step, ±1 step skew) and email codes, with
//! one-shot recovery codes. Login challenges bridge the first and second
//! factor through a short-lived temp session in the KV store.

use crate::crypto::{constant_time_eq, generate_numeric_code, generate_recovery_code, generate_token, sha256_hex};
use crate::domain::{
    Application, EmailType, EventType, StringUuid, TwoFaMethod, TwoFaState, User,
};
use crate::error::{AppError, Result};
use crate::kv::KvOperations;
use crate::repository::UserRepository;
use crate::service::activity::{ActivityLogEngine, EventMeta};
use crate::service::email::EmailSender;
use std::collections::HashMap;
use std::sync::Arc;
use totp_rs::{Algorithm, TOTP};

/// Temp session bridging the two login factors
pub const TEMP_SESSION_TTL_SECS: u64 = 600;
/// Email codes are shorter-lived
pub const EMAIL_CODE_TTL_SECS: u64 = 300;
const RECOVERY_CODE_COUNT: usize = 10;

/// What the client needs to finish enrollment
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrollmentStart {
    pub method: TwoFaMethod,
    /// Base32 TOTP secret (totp method only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// otpauth:// provisioning URL (totp method only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otpauth_url: Option<String>,
}

/// An issued login challenge
#[derive(Debug, Clone)]
pub struct LoginChallenge {
    pub temp_token: String,
    pub method: TwoFaMethod,
}

pub struct TwoFactorService {
    users: Arc<dyn UserRepository>,
    kv: Arc<dyn KvOperations>,
    email: Arc<dyn EmailSender>,
    activity: Arc<ActivityLogEngine>,
}

impl TwoFactorService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        kv: Arc<dyn KvOperations>,
        email: Arc<dyn EmailSender>,
        activity: Arc<ActivityLogEngine>,
    ) -> Self {
        Self {
            users,
            kv,
            email,
            activity,
        }
    }

    fn totp(secret_b32: &str, issuer: &str, account: &str) -> Result<TOTP> {
        let secret = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, secret_b32)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Corrupt TOTP secret")))?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some(issuer.to_string()),
            account.to_string(),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("TOTP setup failed: {}", e)))
    }

    fn verify_totp(secret_b32: &str, code: &str) -> Result<bool> {
        // Issuer and account do not affect verification
        let totp = Self::totp(secret_b32, "authgate", "user")?;
        totp.check_current(code)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Clock error: {}", e)))
    }

    fn generate_secret() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 20];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes)
    }

    fn hash_codes(codes: &[String]) -> String {
        let hashes: Vec<String> = codes.iter().map(|c| sha256_hex(c)).collect();
        serde_json::to_string(&hashes).unwrap_or_else(|_| "[]".to_string())
    }

    async fn load_user(&self, app_id: StringUuid, user_id: StringUuid) -> Result<User> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.app_id == app_id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }
        Ok(user)
    }

    // ==================== Enrollment ====================

    /// Begin 2FA enrollment. TOTP returns the provisioning secret; the
    /// email method sends a code immediately.
    pub async fn start_enrollment(
        &self,
        app: &Application,
        user_id: StringUuid,
        method: TwoFaMethod,
    ) -> Result<EnrollmentStart> {
        if !app.two_fa_enabled {
            return Err(AppError::BadRequest(
                "Two-factor authentication is not enabled for this application".to_string(),
            ));
        }
        if !app.allows_method(method) {
            return Err(AppError::BadRequest(format!(
                "Two-factor method {} is not allowed for this application",
                method.as_str()
            )));
        }

        let user = self.load_user(app.id, user_id).await?;
        if user.two_fa_enabled {
            return Err(AppError::Conflict(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }

        match method {
            TwoFaMethod::Totp => {
                let secret = Self::generate_secret();
                let otpauth_url = Self::totp(&secret, app.issuer_name(), &user.email)?.get_url();

                // Pending until the first code verifies
                self.users
                    .update_two_fa(
                        user_id,
                        &TwoFaState {
                            enabled: false,
                            method: Some(TwoFaMethod::Totp.as_str().to_string()),
                            secret: Some(secret.clone()),
                            recovery_codes: None,
                        },
                    )
                    .await?;

                Ok(EnrollmentStart {
                    method,
                    secret: Some(secret),
                    otpauth_url: Some(otpauth_url),
                })
            }
            TwoFaMethod::Email => {
                self.users
                    .update_two_fa(
                        user_id,
                        &TwoFaState {
                            enabled: false,
                            method: Some(TwoFaMethod::Email.as_str().to_string()),
                            secret: None,
                            recovery_codes: None,
                        },
                    )
                    .await?;
                self.send_email_code(app.id, &user).await?;

                Ok(EnrollmentStart {
                    method,
                    secret: None,
                    otpauth_url: None,
                })
            }
        }
    }

    /// Complete enrollment with a valid code. Returns the one-time-visible
    /// recovery codes.
    pub async fn verify_enrollment(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        code: &str,
        meta: EventMeta,
    ) -> Result<Vec<String>> {
        let user = self.load_user(app_id, user_id).await?;
        if user.two_fa_enabled {
            return Err(AppError::Conflict(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }
        let method = user
            .two_fa_method()
            .ok_or_else(|| AppError::BadRequest("No enrollment in progress".to_string()))?;

        let valid = match method {
            TwoFaMethod::Totp => {
                let secret = user.two_fa_secret.as_deref().ok_or_else(|| {
                    AppError::BadRequest("No enrollment in progress".to_string())
                })?;
                Self::verify_totp(secret, code)?
            }
            TwoFaMethod::Email => self.verify_email_code(app_id, user_id, code).await?,
        };
        if !valid {
            return Err(AppError::Unauthorized("Invalid verification code".to_string()));
        }

        let codes: Vec<String> = (0..RECOVERY_CODE_COUNT)
            .map(|_| generate_recovery_code())
            .collect();

        self.users
            .update_two_fa(
                user_id,
                &TwoFaState {
                    enabled: true,
                    method: Some(method.as_str().to_string()),
                    secret: user.two_fa_secret.clone(),
                    recovery_codes: Some(Self::hash_codes(&codes)),
                },
            )
            .await?;

        self.activity.record(EventType::TwoFaEnable, meta);
        Ok(codes)
    }

    /// Disable 2FA; requires the password (when one exists) and a valid
    /// current code or recovery code.
    pub async fn disable(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        password: Option<&str>,
        code: &str,
        meta: EventMeta,
    ) -> Result<()> {
        let user = self.load_user(app_id, user_id).await?;
        if !user.two_fa_enabled {
            return Err(AppError::BadRequest(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }

        if user.has_password() {
            let password = password.ok_or_else(|| {
                AppError::BadRequest("Password is required".to_string())
            })?;
            if !crate::crypto::verify_password(password, &user.password_hash)? {
                return Err(AppError::Unauthorized("Invalid password".to_string()));
            }
        }

        if !self.verify_any_factor(app_id, &user, code).await? {
            return Err(AppError::Unauthorized("Invalid verification code".to_string()));
        }

        self.users
            .update_two_fa(
                user_id,
                &TwoFaState {
                    enabled: false,
                    method: None,
                    secret: None,
                    recovery_codes: None,
                },
            )
            .await?;

        self.activity.record(EventType::TwoFaDisable, meta);
        Ok(())
    }

    /// Regenerate recovery codes (invalidates previous ones)
    pub async fn generate_recovery_codes(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        meta: EventMeta,
    ) -> Result<Vec<String>> {
        let user = self.load_user(app_id, user_id).await?;
        if !user.two_fa_enabled {
            return Err(AppError::BadRequest(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }

        let codes: Vec<String> = (0..RECOVERY_CODE_COUNT)
            .map(|_| generate_recovery_code())
            .collect();
        self.users
            .set_recovery_codes(user_id, &Self::hash_codes(&codes))
            .await?;

        self.activity.record(EventType::RecoveryCodeGenerate, meta);
        Ok(codes)
    }

    // ==================== Login challenges ====================

    /// Mint the temp session that bridges password and second factor. For
    /// the email method this also dispatches the code.
    pub async fn start_login_challenge(
        &self,
        app_id: StringUuid,
        user: &User,
    ) -> Result<LoginChallenge> {
        let method = user.two_fa_method().unwrap_or(TwoFaMethod::Totp);
        let temp_token = generate_token();
        self.kv
            .store_temp_session(app_id, &temp_token, user.id, TEMP_SESSION_TTL_SECS)
            .await?;

        if method == TwoFaMethod::Email {
            self.send_email_code(app_id, user).await?;
        }

        Ok(LoginChallenge { temp_token, method })
    }

    /// Second factor of a 2FA login: code or one-shot recovery code. On
    /// success the temp session is consumed and the user ID returned.
    pub async fn verify_login(
        &self,
        app_id: StringUuid,
        temp_token: &str,
        code: Option<&str>,
        recovery_code: Option<&str>,
        meta: EventMeta,
    ) -> Result<StringUuid> {
        let user_id = self
            .kv
            .get_temp_session(app_id, temp_token)
            .await?
            .and_then(|raw| StringUuid::parse_str(&raw).ok())
            .ok_or_else(|| {
                AppError::Unauthorized("Invalid or expired 2FA session".to_string())
            })?;

        let user = self.load_user(app_id, user_id).await?;
        if !user.two_fa_enabled {
            return Err(AppError::BadRequest(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }

        let mut event = EventType::TwoFaLogin;
        let valid = match (code, recovery_code) {
            (_, Some(recovery)) => {
                let used = self.consume_recovery_code(&user, recovery).await?;
                if used {
                    event = EventType::RecoveryCodeUsed;
                }
                used
            }
            (Some(code), None) => self.verify_primary_factor(app_id, &user, code).await?,
            (None, None) => {
                return Err(AppError::BadRequest(
                    "A code or recovery code is required".to_string(),
                ))
            }
        };

        if !valid {
            return Err(AppError::Unauthorized("Invalid verification code".to_string()));
        }

        self.kv.delete_temp_session(app_id, temp_token).await?;

        let mut meta = meta;
        meta.user_id = Some(user_id);
        self.activity.record(event, meta);
        Ok(user_id)
    }

    // ==================== Factor helpers ====================

    async fn verify_primary_factor(
        &self,
        app_id: StringUuid,
        user: &User,
        code: &str,
    ) -> Result<bool> {
        match user.two_fa_method() {
            Some(TwoFaMethod::Totp) => {
                let secret = user
                    .two_fa_secret
                    .as_deref()
                    .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Missing TOTP secret")))?;
                Self::verify_totp(secret, code)
            }
            Some(TwoFaMethod::Email) => self.verify_email_code(app_id, user.id, code).await,
            None => Ok(false),
        }
    }

    /// Primary factor or recovery code, used by the disable flow
    async fn verify_any_factor(
        &self,
        app_id: StringUuid,
        user: &User,
        code: &str,
    ) -> Result<bool> {
        if self.verify_primary_factor(app_id, user, code).await? {
            return Ok(true);
        }
        self.consume_recovery_code(user, code).await
    }

    async fn verify_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        code: &str,
    ) -> Result<bool> {
        let Some(stored) = self.kv.get_email_code(app_id, user_id).await? else {
            return Ok(false);
        };
        if constant_time_eq(stored.as_bytes(), code.as_bytes()) {
            // One-shot: burn only on success so a typo doesn't lock out
            self.kv.delete_email_code(app_id, user_id).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn send_email_code(&self, app_id: StringUuid, user: &User) -> Result<()> {
        let code = generate_numeric_code();
        self.kv
            .store_email_code(app_id, user.id, &code, EMAIL_CODE_TTL_SECS)
            .await?;

        let mut variables = HashMap::new();
        variables.insert("email".to_string(), user.email.clone());
        variables.insert("code".to_string(), code);
        self.email
            .send(Some(app_id), EmailType::TwoFaCode, &user.email, &variables)
            .await
    }

    /// One-shot consumption: the matched hash is removed from the opaque
    /// JSON array.
    async fn consume_recovery_code(&self, user: &User, code: &str) -> Result<bool> {
        let Some(raw) = user.two_fa_recovery_codes.as_deref() else {
            return Ok(false);
        };
        let mut hashes: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
        let digest = sha256_hex(&code.trim().to_uppercase());

        let Some(position) = hashes.iter().position(|h| h == &digest) else {
            return Ok(false);
        };
        hashes.remove(position);

        let payload = serde_json::to_string(&hashes)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Recovery code encode: {}", e)))?;
        self.users.set_recovery_codes(user.id, &payload).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivityConfig;
    use crate::kv::MemoryKvStore;
    use crate::repository::activity_log::MockActivityLogRepository;
    use crate::repository::user::MockUserRepository;
    use crate::service::email::MockEmailSender;
    use chrono::Utc;

    fn quiet_activity(kv: Arc<MemoryKvStore>) -> Arc<ActivityLogEngine> {
        let mut repo = MockActivityLogRepository::new();
        repo.expect_create().returning(|_| Ok(()));
        Arc::new(ActivityLogEngine::new(
            Arc::new(repo),
            kv,
            ActivityConfig::default(),
        ))
    }

    fn sample_user(app_id: StringUuid) -> User {
        User {
            id: StringUuid::new_v4(),
            app_id,
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            email_verified: true,
            is_active: true,
            two_fa_enabled: false,
            two_fa_method: None,
            two_fa_secret: None,
            two_fa_recovery_codes: None,
            first_name: None,
            last_name: None,
            picture: None,
            locale: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(users: MockUserRepository, kv: Arc<MemoryKvStore>) -> TwoFactorService {
        let mut email = MockEmailSender::new();
        email.expect_send().returning(|_, _, _, _| Ok(()));
        TwoFactorService::new(
            Arc::new(users),
            kv.clone(),
            Arc::new(email),
            quiet_activity(kv),
        )
    }

    #[test]
    fn test_totp_roundtrip() {
        let secret = TwoFactorService::generate_secret();
        let totp = TwoFactorService::totp(&secret, "Acme", "alice@example.com").unwrap();
        let code = totp.generate_current().unwrap();
        assert!(TwoFactorService::verify_totp(&secret, &code).unwrap());

        // A code for a different secret does not verify
        let other = TwoFactorService::generate_secret();
        let other_code = TwoFactorService::totp(&other, "Acme", "a@b.c")
            .unwrap()
            .generate_current()
            .unwrap();
        if other_code != code {
            assert!(!TwoFactorService::verify_totp(&secret, &other_code).unwrap());
        }
    }

    #[test]
    fn test_otpauth_url_carries_issuer() {
        let secret = TwoFactorService::generate_secret();
        let url = TwoFactorService::totp(&secret, "Acme Prod", "alice@example.com")
            .unwrap()
            .get_url();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("Acme%20Prod"));
    }

    #[tokio::test]
    async fn test_email_code_login_challenge() {
        let app_id = StringUuid::new_v4();
        let mut user = sample_user(app_id);
        user.two_fa_enabled = true;
        user.two_fa_method = Some("email".to_string());
        let user_id = user.id;

        let kv = Arc::new(MemoryKvStore::new());
        let mut users = MockUserRepository::new();
        let user_clone = user.clone();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(user_clone.clone())));

        let svc = service(users, kv.clone());

        let challenge = svc.start_login_challenge(app_id, &user).await.unwrap();
        assert_eq!(challenge.method, TwoFaMethod::Email);

        // The code was stored under the user's email-code key
        let code = kv.get_email_code(app_id, user_id).await.unwrap().unwrap();
        assert_eq!(code.len(), 6);

        let resolved = svc
            .verify_login(
                app_id,
                &challenge.temp_token,
                Some(&code),
                None,
                EventMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(resolved, user_id);

        // Temp session is one-shot
        let again = svc
            .verify_login(
                app_id,
                &challenge.temp_token,
                Some(&code),
                None,
                EventMeta::default(),
            )
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_wrong_email_code_rejected_but_not_burned() {
        let app_id = StringUuid::new_v4();
        let mut user = sample_user(app_id);
        user.two_fa_enabled = true;
        user.two_fa_method = Some("email".to_string());

        let kv = Arc::new(MemoryKvStore::new());
        let mut users = MockUserRepository::new();
        let user_clone = user.clone();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(user_clone.clone())));

        let svc = service(users, kv.clone());
        let challenge = svc.start_login_challenge(app_id, &user).await.unwrap();
        let code = kv.get_email_code(app_id, user.id).await.unwrap().unwrap();

        let wrong = svc
            .verify_login(
                app_id,
                &challenge.temp_token,
                Some("999999"),
                None,
                EventMeta::default(),
            )
            .await;
        assert!(wrong.is_err());

        // The right code still works afterwards
        let ok = svc
            .verify_login(
                app_id,
                &challenge.temp_token,
                Some(&code),
                None,
                EventMeta::default(),
            )
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_recovery_code_single_use() {
        let app_id = StringUuid::new_v4();
        let code = generate_recovery_code();
        let hashes = TwoFactorService::hash_codes(&[code.clone()]);

        let mut user = sample_user(app_id);
        user.two_fa_enabled = true;
        user.two_fa_method = Some("totp".to_string());
        user.two_fa_secret = Some(TwoFactorService::generate_secret());
        user.two_fa_recovery_codes = Some(hashes);
        let user_id = user.id;

        let kv = Arc::new(MemoryKvStore::new());
        kv.store_temp_session(app_id, "temp-1", user_id, 600)
            .await
            .unwrap();
        kv.store_temp_session(app_id, "temp-2", user_id, 600)
            .await
            .unwrap();

        let mut users = MockUserRepository::new();
        // After consumption the stored array is empty
        let mut consumed = false;
        let user_clone = user.clone();
        users.expect_find_by_id().returning(move |_| {
            let mut u = user_clone.clone();
            if consumed {
                u.two_fa_recovery_codes = Some("[]".to_string());
            }
            consumed = true;
            Ok(Some(u))
        });
        users.expect_set_recovery_codes().times(1).returning(|_, _| Ok(()));

        let svc = service(users, kv);

        let first = svc
            .verify_login(app_id, "temp-1", None, Some(&code), EventMeta::default())
            .await;
        assert!(first.is_ok());

        let second = svc
            .verify_login(app_id, "temp-2", None, Some(&code), EventMeta::default())
            .await;
        assert!(second.is_err());
    }
}
