//! Admin GUI sessions
//!
//! Username/password login for control-plane operators, with sessions in
//! the KV store and an HTTP-only cookie carrying the session ID.

use crate::crypto::{generate_token, hash_password, verify_password};
use crate::domain::{AdminAccount, AdminSession, CreateAdminAccountInput, StringUuid};
use crate::error::{AppError, Result};
use crate::kv::KvOperations;
use crate::repository::AdminAccountRepository;
use chrono::Utc;
use std::sync::Arc;

pub struct AdminSessionService {
    accounts: Arc<dyn AdminAccountRepository>,
    kv: Arc<dyn KvOperations>,
    session_ttl_secs: u64,
}

impl AdminSessionService {
    pub fn new(
        accounts: Arc<dyn AdminAccountRepository>,
        kv: Arc<dyn KvOperations>,
        session_ttl_secs: u64,
    ) -> Self {
        Self {
            accounts,
            kv,
            session_ttl_secs,
        }
    }

    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl_secs
    }

    /// Verify credentials and mint a session. Returns the session ID for
    /// the cookie.
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, AdminSession)> {
        let account = self
            .accounts
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

        if !verify_password(password, &account.password_hash)? {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }

        if let Err(e) = self.accounts.touch_last_login(account.id).await {
            tracing::debug!(error = %e, "Failed to update admin last_login_at");
        }

        let session = AdminSession {
            admin_id: account.id,
            username: account.username.clone(),
            created_at: Utc::now(),
        };
        let session_id = generate_token();
        let payload = serde_json::to_string(&session)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Session encode: {}", e)))?;
        self.kv
            .store_admin_session(&session_id, &payload, self.session_ttl_secs)
            .await?;

        Ok((session_id, session))
    }

    pub async fn logout(&self, session_id: &str) -> Result<()> {
        self.kv.delete_admin_session(session_id).await
    }

    // ==================== Account management ====================

    pub async fn create_account(&self, input: &CreateAdminAccountInput) -> Result<AdminAccount> {
        let password_hash = hash_password(&input.password)?;
        self.accounts
            .create(&input.username, input.email.as_deref(), &password_hash)
            .await
    }

    pub async fn list_accounts(&self) -> Result<Vec<AdminAccount>> {
        self.accounts.list().await
    }

    pub async fn change_password(
        &self,
        admin_id: StringUuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let account = self
            .accounts
            .find_by_id(admin_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Admin account not found".to_string()))?;

        if !verify_password(current_password, &account.password_hash)? {
            return Err(AppError::Unauthorized("Invalid password".to_string()));
        }

        self.accounts
            .update_password(admin_id, &hash_password(new_password)?)
            .await
    }

    pub async fn delete_account(&self, admin_id: StringUuid) -> Result<()> {
        // Never delete the last operator
        if self.accounts.count().await? <= 1 {
            return Err(AppError::BadRequest(
                "Cannot delete the last admin account".to_string(),
            ));
        }
        self.accounts.delete(admin_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::repository::admin::MockAdminAccountRepository;

    fn account(username: &str, password: &str) -> AdminAccount {
        AdminAccount {
            id: StringUuid::new_v4(),
            username: username.to_string(),
            email: None,
            password_hash: hash_password(password).unwrap(),
            two_fa_enabled: false,
            two_fa_method: None,
            two_fa_secret: None,
            two_fa_recovery_codes: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_login_creates_session() {
        let admin = account("root", "Sup3rSecret!");

        let mut repo = MockAdminAccountRepository::new();
        let admin_clone = admin.clone();
        repo.expect_find_by_username()
            .returning(move |_| Ok(Some(admin_clone.clone())));
        repo.expect_touch_last_login().returning(|_| Ok(()));

        let kv = Arc::new(MemoryKvStore::new());
        let svc = AdminSessionService::new(Arc::new(repo), kv.clone(), 3600);

        let (session_id, session) = svc.login("root", "Sup3rSecret!").await.unwrap();
        assert_eq!(session.username, "root");

        let stored = kv.get_admin_session(&session_id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let admin = account("root", "Sup3rSecret!");

        let mut repo = MockAdminAccountRepository::new();
        repo.expect_find_by_username()
            .returning(move |_| Ok(Some(admin.clone())));

        let svc =
            AdminSessionService::new(Arc::new(repo), Arc::new(MemoryKvStore::new()), 3600);
        let result = svc.login("root", "wrong").await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_logout_deletes_session() {
        let admin = account("root", "Sup3rSecret!");

        let mut repo = MockAdminAccountRepository::new();
        let admin_clone = admin.clone();
        repo.expect_find_by_username()
            .returning(move |_| Ok(Some(admin_clone.clone())));
        repo.expect_touch_last_login().returning(|_| Ok(()));

        let kv = Arc::new(MemoryKvStore::new());
        let svc = AdminSessionService::new(Arc::new(repo), kv.clone(), 3600);

        let (session_id, _) = svc.login("root", "Sup3rSecret!").await.unwrap();
        svc.logout(&session_id).await.unwrap();
        assert!(kv.get_admin_session(&session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cannot_delete_last_admin() {
        let mut repo = MockAdminAccountRepository::new();
        repo.expect_count().returning(|| Ok(1));

        let svc =
            AdminSessionService::new(Arc::new(repo), Arc::new(MemoryKvStore::new()), 3600);
        let result = svc.delete_account(StringUuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
