//! Shared key-value store layer
//!
//! All ephemeral state (refresh tokens, blacklists, one-shot tokens, temp
//! sessions, admin sessions, CSRF tokens, role caches, anomaly fingerprints)
//! lives behind the [`KvOperations`] trait. Production uses Redis; tests and
//! single-node development can use the in-memory implementation.
//!
//! Callers must treat an absent key as a negative result. Connection
//! failures surface as `AppError::Kv` and are fatal for authenticated
//! requests.

use crate::domain::UserRolesInApp;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::domain::StringUuid;

/// Key builders for the shared namespace. Every application-scoped key is
/// prefixed `app:{app_id}:`.
pub mod keys {
    use crate::domain::StringUuid;

    pub fn refresh_token(app_id: StringUuid, user_id: StringUuid) -> String {
        format!("app:{}:refresh:{}", app_id, user_id)
    }

    pub fn blacklist_token(app_id: StringUuid, token_hash: &str) -> String {
        format!("app:{}:blacklist_token:{}", app_id, token_hash)
    }

    pub fn blacklist_user(app_id: StringUuid, user_id: StringUuid) -> String {
        format!("app:{}:blacklist_user:{}", app_id, user_id)
    }

    pub fn email_verify(app_id: StringUuid, token: &str) -> String {
        format!("app:{}:email_verify:{}", app_id, token)
    }

    pub fn password_reset(app_id: StringUuid, token: &str) -> String {
        format!("app:{}:pwreset:{}", app_id, token)
    }

    pub fn temp_session(app_id: StringUuid, token: &str) -> String {
        format!("app:{}:temp_session:{}", app_id, token)
    }

    pub fn two_fa_email_code(app_id: StringUuid, user_id: StringUuid) -> String {
        format!("app:{}:2fa_email:{}", app_id, user_id)
    }

    pub fn user_roles(app_id: StringUuid, user_id: StringUuid) -> String {
        format!("app:{}:user_roles:{}", app_id, user_id)
    }

    pub fn anomaly(app_id: StringUuid, user_id: StringUuid) -> String {
        format!("app:{}:anomaly:{}", app_id, user_id)
    }

    pub fn admin_session(session_id: &str) -> String {
        format!("admin:session:{}", session_id)
    }

    pub fn admin_csrf(session_id: &str) -> String {
        format!("admin:csrf:{}", session_id)
    }
}

/// TTL for the cached role resolution
const USER_ROLES_TTL_SECS: u64 = 300;

/// SHA-256 hex digest used to key raw tokens; tokens never appear verbatim
/// in the store.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Typed, namespaced operations over the shared key-value store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvOperations: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // ==================== Refresh token storage ====================

    /// Store the hash of the user's current refresh token
    async fn store_refresh_token(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        token_hash: &str,
        ttl_secs: u64,
    ) -> Result<()>;

    async fn get_refresh_token(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>>;

    async fn delete_refresh_token(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()>;

    // ==================== Blacklists ====================

    /// Deny a single token for `ttl_secs` (its remaining lifetime)
    async fn blacklist_token(
        &self,
        app_id: StringUuid,
        token_hash: &str,
        ttl_secs: u64,
    ) -> Result<()>;

    async fn is_token_blacklisted(&self, app_id: StringUuid, token_hash: &str) -> Result<bool>;

    /// Deny every token of a user issued before now
    async fn blacklist_user(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()>;

    async fn is_user_blacklisted(&self, app_id: StringUuid, user_id: StringUuid) -> Result<bool>;

    // ==================== One-shot tokens ====================

    async fn store_email_verification(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()>;

    /// Consume an email verification token (single use)
    async fn take_email_verification(
        &self,
        app_id: StringUuid,
        token: &str,
    ) -> Result<Option<String>>;

    async fn store_password_reset(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()>;

    /// Consume a password reset token (single use)
    async fn take_password_reset(
        &self,
        app_id: StringUuid,
        token: &str,
    ) -> Result<Option<String>>;

    // ==================== 2FA temp sessions and email codes ====================

    async fn store_temp_session(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()>;

    async fn get_temp_session(&self, app_id: StringUuid, token: &str) -> Result<Option<String>>;

    async fn delete_temp_session(&self, app_id: StringUuid, token: &str) -> Result<()>;

    async fn store_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        code: &str,
        ttl_secs: u64,
    ) -> Result<()>;

    async fn get_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>>;

    async fn delete_email_code(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()>;

    // ==================== Admin sessions and CSRF ====================

    async fn store_admin_session(
        &self,
        session_id: &str,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()>;

    async fn get_admin_session(&self, session_id: &str) -> Result<Option<String>>;

    async fn delete_admin_session(&self, session_id: &str) -> Result<()>;

    /// Store the per-session CSRF token; stable for the session's lifetime
    async fn store_csrf_token(&self, session_id: &str, token: &str, ttl_secs: u64) -> Result<()>;

    async fn get_csrf_token(&self, session_id: &str) -> Result<Option<String>>;

    // ==================== RBAC cache ====================

    async fn get_user_roles(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<UserRolesInApp>>;

    async fn set_user_roles(&self, roles: &UserRolesInApp) -> Result<()>;

    async fn invalidate_user_roles(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()>;

    // ==================== Anomaly fingerprints ====================

    async fn get_anomaly_fingerprint(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>>;

    async fn set_anomaly_fingerprint(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()>;
}

// ============================================================
// Redis implementation
// ============================================================

/// Redis-backed store used in production
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;
        Ok(Self { conn })
    }

    /// Connection handle for the rate limiter, which manages its own keys
    pub fn connection_manager(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        metrics::counter!("authgate_kv_operations_total", "operation" => "set").increment(1);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        metrics::counter!("authgate_kv_operations_total", "operation" => "get").increment(1);
        Ok(value)
    }

    /// GETDEL for one-shot tokens
    async fn take(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        metrics::counter!("authgate_kv_operations_total", "operation" => "getdel").increment(1);
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        metrics::counter!("authgate_kv_operations_total", "operation" => "del").increment(1);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        metrics::counter!("authgate_kv_operations_total", "operation" => "exists").increment(1);
        Ok(exists)
    }
}

#[async_trait]
impl KvOperations for RedisKvStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn store_refresh_token(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        token_hash: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::refresh_token(app_id, user_id), token_hash, ttl_secs)
            .await
    }

    async fn get_refresh_token(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>> {
        self.get(&keys::refresh_token(app_id, user_id)).await
    }

    async fn delete_refresh_token(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.delete(&keys::refresh_token(app_id, user_id)).await
    }

    async fn blacklist_token(
        &self,
        app_id: StringUuid,
        token_hash: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        if ttl_secs == 0 {
            return Ok(()); // already expired, nothing to deny
        }
        self.set_ex(&keys::blacklist_token(app_id, token_hash), "1", ttl_secs)
            .await
    }

    async fn is_token_blacklisted(&self, app_id: StringUuid, token_hash: &str) -> Result<bool> {
        self.exists(&keys::blacklist_token(app_id, token_hash)).await
    }

    async fn blacklist_user(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::blacklist_user(app_id, user_id), "1", ttl_secs)
            .await
    }

    async fn is_user_blacklisted(&self, app_id: StringUuid, user_id: StringUuid) -> Result<bool> {
        self.exists(&keys::blacklist_user(app_id, user_id)).await
    }

    async fn store_email_verification(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(
            &keys::email_verify(app_id, token),
            &user_id.to_string(),
            ttl_secs,
        )
        .await
    }

    async fn take_email_verification(
        &self,
        app_id: StringUuid,
        token: &str,
    ) -> Result<Option<String>> {
        self.take(&keys::email_verify(app_id, token)).await
    }

    async fn store_password_reset(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(
            &keys::password_reset(app_id, token),
            &user_id.to_string(),
            ttl_secs,
        )
        .await
    }

    async fn take_password_reset(
        &self,
        app_id: StringUuid,
        token: &str,
    ) -> Result<Option<String>> {
        self.take(&keys::password_reset(app_id, token)).await
    }

    async fn store_temp_session(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(
            &keys::temp_session(app_id, token),
            &user_id.to_string(),
            ttl_secs,
        )
        .await
    }

    async fn get_temp_session(&self, app_id: StringUuid, token: &str) -> Result<Option<String>> {
        self.get(&keys::temp_session(app_id, token)).await
    }

    async fn delete_temp_session(&self, app_id: StringUuid, token: &str) -> Result<()> {
        self.delete(&keys::temp_session(app_id, token)).await
    }

    async fn store_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        code: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::two_fa_email_code(app_id, user_id), code, ttl_secs)
            .await
    }

    async fn get_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>> {
        self.get(&keys::two_fa_email_code(app_id, user_id)).await
    }

    async fn delete_email_code(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.delete(&keys::two_fa_email_code(app_id, user_id)).await
    }

    async fn store_admin_session(
        &self,
        session_id: &str,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::admin_session(session_id), payload, ttl_secs)
            .await
    }

    async fn get_admin_session(&self, session_id: &str) -> Result<Option<String>> {
        self.get(&keys::admin_session(session_id)).await
    }

    async fn delete_admin_session(&self, session_id: &str) -> Result<()> {
        self.delete(&keys::admin_session(session_id)).await?;
        self.delete(&keys::admin_csrf(session_id)).await
    }

    async fn store_csrf_token(&self, session_id: &str, token: &str, ttl_secs: u64) -> Result<()> {
        self.set_ex(&keys::admin_csrf(session_id), token, ttl_secs)
            .await
    }

    async fn get_csrf_token(&self, session_id: &str) -> Result<Option<String>> {
        self.get(&keys::admin_csrf(session_id)).await
    }

    async fn get_user_roles(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<UserRolesInApp>> {
        let value = self.get(&keys::user_roles(app_id, user_id)).await?;
        match value {
            Some(v) => {
                let parsed = serde_json::from_str(&v).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("Role cache deserialize error: {}", e))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    async fn set_user_roles(&self, roles: &UserRolesInApp) -> Result<()> {
        let payload = serde_json::to_string(roles)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Role cache serialize error: {}", e)))?;
        self.set_ex(
            &keys::user_roles(roles.app_id, roles.user_id),
            &payload,
            USER_ROLES_TTL_SECS,
        )
        .await
    }

    async fn invalidate_user_roles(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.delete(&keys::user_roles(app_id, user_id)).await
    }

    async fn get_anomaly_fingerprint(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>> {
        self.get(&keys::anomaly(app_id, user_id)).await
    }

    async fn set_anomaly_fingerprint(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::anomaly(app_id, user_id), payload, ttl_secs)
            .await
    }
}

// ============================================================
// In-memory implementation
// ============================================================

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| t <= Instant::now()).unwrap_or(false)
    }
}

/// In-memory store for tests and single-node development. TTLs are honored
/// lazily on read.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) {
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        };
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone())
    }

    async fn take(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        entries
            .remove(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value)
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Number of live entries (test helper)
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvOperations for MemoryKvStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn store_refresh_token(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        token_hash: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::refresh_token(app_id, user_id), token_hash, ttl_secs)
            .await;
        Ok(())
    }

    async fn get_refresh_token(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>> {
        Ok(self.get(&keys::refresh_token(app_id, user_id)).await)
    }

    async fn delete_refresh_token(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.delete(&keys::refresh_token(app_id, user_id)).await;
        Ok(())
    }

    async fn blacklist_token(
        &self,
        app_id: StringUuid,
        token_hash: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        if ttl_secs == 0 {
            return Ok(());
        }
        self.set_ex(&keys::blacklist_token(app_id, token_hash), "1", ttl_secs)
            .await;
        Ok(())
    }

    async fn is_token_blacklisted(&self, app_id: StringUuid, token_hash: &str) -> Result<bool> {
        Ok(self.exists(&keys::blacklist_token(app_id, token_hash)).await)
    }

    async fn blacklist_user(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::blacklist_user(app_id, user_id), "1", ttl_secs)
            .await;
        Ok(())
    }

    async fn is_user_blacklisted(&self, app_id: StringUuid, user_id: StringUuid) -> Result<bool> {
        Ok(self.exists(&keys::blacklist_user(app_id, user_id)).await)
    }

    async fn store_email_verification(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(
            &keys::email_verify(app_id, token),
            &user_id.to_string(),
            ttl_secs,
        )
        .await;
        Ok(())
    }

    async fn take_email_verification(
        &self,
        app_id: StringUuid,
        token: &str,
    ) -> Result<Option<String>> {
        Ok(self.take(&keys::email_verify(app_id, token)).await)
    }

    async fn store_password_reset(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(
            &keys::password_reset(app_id, token),
            &user_id.to_string(),
            ttl_secs,
        )
        .await;
        Ok(())
    }

    async fn take_password_reset(
        &self,
        app_id: StringUuid,
        token: &str,
    ) -> Result<Option<String>> {
        Ok(self.take(&keys::password_reset(app_id, token)).await)
    }

    async fn store_temp_session(
        &self,
        app_id: StringUuid,
        token: &str,
        user_id: StringUuid,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(
            &keys::temp_session(app_id, token),
            &user_id.to_string(),
            ttl_secs,
        )
        .await;
        Ok(())
    }

    async fn get_temp_session(&self, app_id: StringUuid, token: &str) -> Result<Option<String>> {
        Ok(self.get(&keys::temp_session(app_id, token)).await)
    }

    async fn delete_temp_session(&self, app_id: StringUuid, token: &str) -> Result<()> {
        self.delete(&keys::temp_session(app_id, token)).await;
        Ok(())
    }

    async fn store_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        code: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::two_fa_email_code(app_id, user_id), code, ttl_secs)
            .await;
        Ok(())
    }

    async fn get_email_code(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>> {
        Ok(self.get(&keys::two_fa_email_code(app_id, user_id)).await)
    }

    async fn delete_email_code(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.delete(&keys::two_fa_email_code(app_id, user_id)).await;
        Ok(())
    }

    async fn store_admin_session(
        &self,
        session_id: &str,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::admin_session(session_id), payload, ttl_secs)
            .await;
        Ok(())
    }

    async fn get_admin_session(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.get(&keys::admin_session(session_id)).await)
    }

    async fn delete_admin_session(&self, session_id: &str) -> Result<()> {
        self.delete(&keys::admin_session(session_id)).await;
        self.delete(&keys::admin_csrf(session_id)).await;
        Ok(())
    }

    async fn store_csrf_token(&self, session_id: &str, token: &str, ttl_secs: u64) -> Result<()> {
        self.set_ex(&keys::admin_csrf(session_id), token, ttl_secs)
            .await;
        Ok(())
    }

    async fn get_csrf_token(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.get(&keys::admin_csrf(session_id)).await)
    }

    async fn get_user_roles(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<UserRolesInApp>> {
        match self.get(&keys::user_roles(app_id, user_id)).await {
            Some(v) => Ok(Some(serde_json::from_str(&v).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Role cache deserialize error: {}", e))
            })?)),
            None => Ok(None),
        }
    }

    async fn set_user_roles(&self, roles: &UserRolesInApp) -> Result<()> {
        let payload = serde_json::to_string(roles)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Role cache serialize error: {}", e)))?;
        self.set_ex(
            &keys::user_roles(roles.app_id, roles.user_id),
            &payload,
            USER_ROLES_TTL_SECS,
        )
        .await;
        Ok(())
    }

    async fn invalidate_user_roles(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.delete(&keys::user_roles(app_id, user_id)).await;
        Ok(())
    }

    async fn get_anomaly_fingerprint(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<Option<String>> {
        Ok(self.get(&keys::anomaly(app_id, user_id)).await)
    }

    async fn set_anomaly_fingerprint(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.set_ex(&keys::anomaly(app_id, user_id), payload, ttl_secs)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (StringUuid, StringUuid) {
        (
            StringUuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            StringUuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap(),
        )
    }

    #[test]
    fn test_key_formats() {
        let (app, user) = ids();
        assert_eq!(
            keys::refresh_token(app, user),
            "app:550e8400-e29b-41d4-a716-446655440000:refresh:6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
        assert_eq!(
            keys::blacklist_token(app, "abc"),
            "app:550e8400-e29b-41d4-a716-446655440000:blacklist_token:abc"
        );
        assert_eq!(
            keys::blacklist_user(app, user),
            "app:550e8400-e29b-41d4-a716-446655440000:blacklist_user:6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
        assert_eq!(
            keys::email_verify(app, "t1"),
            "app:550e8400-e29b-41d4-a716-446655440000:email_verify:t1"
        );
        assert_eq!(
            keys::password_reset(app, "t1"),
            "app:550e8400-e29b-41d4-a716-446655440000:pwreset:t1"
        );
        assert_eq!(
            keys::temp_session(app, "t1"),
            "app:550e8400-e29b-41d4-a716-446655440000:temp_session:t1"
        );
        assert_eq!(
            keys::two_fa_email_code(app, user),
            "app:550e8400-e29b-41d4-a716-446655440000:2fa_email:6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
        assert_eq!(keys::admin_session("s1"), "admin:session:s1");
        assert_eq!(keys::admin_csrf("s1"), "admin:csrf:s1");
    }

    #[test]
    fn test_token_digest_deterministic() {
        assert_eq!(token_digest("t"), token_digest("t"));
        assert_ne!(token_digest("a"), token_digest("b"));
        assert_eq!(token_digest("t").len(), 64);
    }

    #[tokio::test]
    async fn test_memory_refresh_token_roundtrip() {
        let kv = MemoryKvStore::new();
        let (app, user) = ids();

        kv.store_refresh_token(app, user, "hash1", 60).await.unwrap();
        assert_eq!(
            kv.get_refresh_token(app, user).await.unwrap(),
            Some("hash1".to_string())
        );

        kv.delete_refresh_token(app, user).await.unwrap();
        assert!(kv.get_refresh_token(app, user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_blacklists() {
        let kv = MemoryKvStore::new();
        let (app, user) = ids();

        assert!(!kv.is_token_blacklisted(app, "h").await.unwrap());
        kv.blacklist_token(app, "h", 60).await.unwrap();
        assert!(kv.is_token_blacklisted(app, "h").await.unwrap());

        // Zero TTL means the token is already expired; nothing is stored
        kv.blacklist_token(app, "h2", 0).await.unwrap();
        assert!(!kv.is_token_blacklisted(app, "h2").await.unwrap());

        assert!(!kv.is_user_blacklisted(app, user).await.unwrap());
        kv.blacklist_user(app, user, 60).await.unwrap();
        assert!(kv.is_user_blacklisted(app, user).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_one_shot_consume() {
        let kv = MemoryKvStore::new();
        let (app, user) = ids();

        kv.store_email_verification(app, "tok", user, 60)
            .await
            .unwrap();
        let first = kv.take_email_verification(app, "tok").await.unwrap();
        assert_eq!(first, Some(user.to_string()));
        let second = kv.take_email_verification(app, "tok").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let kv = MemoryKvStore::new();
        let (app, user) = ids();

        kv.store_email_code(app, user, "123456", 1).await.unwrap();
        assert!(kv.get_email_code(app, user).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(kv.get_email_code(app, user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_roles_cache() {
        let kv = MemoryKvStore::new();
        let (app, user) = ids();

        assert!(kv.get_user_roles(app, user).await.unwrap().is_none());

        let roles = UserRolesInApp {
            user_id: user,
            app_id: app,
            roles: vec!["member".to_string()],
            permissions: vec!["users:read".to_string()],
        };
        kv.set_user_roles(&roles).await.unwrap();

        let cached = kv.get_user_roles(app, user).await.unwrap().unwrap();
        assert_eq!(cached.roles, vec!["member"]);

        kv.invalidate_user_roles(app, user).await.unwrap();
        assert!(kv.get_user_roles(app, user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_admin_session_and_csrf() {
        let kv = MemoryKvStore::new();

        kv.store_admin_session("sid", "{\"username\":\"root\"}", 60)
            .await
            .unwrap();
        kv.store_csrf_token("sid", "csrf-token", 60).await.unwrap();

        assert!(kv.get_admin_session("sid").await.unwrap().is_some());
        assert_eq!(
            kv.get_csrf_token("sid").await.unwrap(),
            Some("csrf-token".to_string())
        );

        // Deleting the session also drops its CSRF token
        kv.delete_admin_session("sid").await.unwrap();
        assert!(kv.get_admin_session("sid").await.unwrap().is_none());
        assert!(kv.get_csrf_token("sid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_anomaly_fingerprint() {
        let kv = MemoryKvStore::new();
        let (app, user) = ids();

        assert!(kv
            .get_anomaly_fingerprint(app, user)
            .await
            .unwrap()
            .is_none());
        kv.set_anomaly_fingerprint(app, user, "{\"ips\":[\"1.1.1.1\"]}", 60)
            .await
            .unwrap();
        assert!(kv
            .get_anomaly_fingerprint(app, user)
            .await
            .unwrap()
            .is_some());
    }
}
