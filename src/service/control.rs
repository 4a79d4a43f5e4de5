//! Control-plane operations: tenants, applications, OAuth provider
//! configs, and administrative user management.

use crate::crypto::aes::{self, EncryptionKey};
use crate::domain::{
    Application, CreateApplicationInput, CreateTenantInput, EmailType, OAuthProviderConfig,
    StringUuid, Tenant, UpdateApplicationInput, UpdateTenantInput, UpsertOAuthConfigInput, User,
};
use crate::error::{AppError, Result};
use crate::repository::{
    ApplicationRepository, OAuthConfigRepository, TenantRepository, UserRepository,
};
use crate::service::email::EmailSender;
use crate::service::rbac::RbacService;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ControlPlaneService {
    tenants: Arc<dyn TenantRepository>,
    applications: Arc<dyn ApplicationRepository>,
    oauth_configs: Arc<dyn OAuthConfigRepository>,
    users: Arc<dyn UserRepository>,
    rbac: Arc<RbacService>,
    email: Arc<dyn EmailSender>,
    /// When absent, OAuth client secrets are stored in plaintext (logged
    /// as a warning at startup)
    encryption_key: Option<EncryptionKey>,
}

impl ControlPlaneService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        applications: Arc<dyn ApplicationRepository>,
        oauth_configs: Arc<dyn OAuthConfigRepository>,
        users: Arc<dyn UserRepository>,
        rbac: Arc<RbacService>,
        email: Arc<dyn EmailSender>,
        encryption_key: Option<EncryptionKey>,
    ) -> Self {
        Self {
            tenants,
            applications,
            oauth_configs,
            users,
            rbac,
            email,
            encryption_key,
        }
    }

    // ==================== Tenants ====================

    pub async fn create_tenant(&self, input: &CreateTenantInput) -> Result<Tenant> {
        self.tenants.create(input).await
    }

    pub async fn get_tenant(&self, id: StringUuid) -> Result<Tenant> {
        self.tenants
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tenant {} not found", id)))
    }

    pub async fn list_tenants(&self, offset: i64, limit: i64) -> Result<Vec<Tenant>> {
        self.tenants.list(offset, limit).await
    }

    pub async fn update_tenant(&self, id: StringUuid, input: &UpdateTenantInput) -> Result<Tenant> {
        self.tenants.update(id, input).await
    }

    pub async fn delete_tenant(&self, id: StringUuid) -> Result<()> {
        self.tenants.delete(id).await
    }

    // ==================== Applications ====================

    /// Create an application and seed its system roles
    pub async fn create_application(&self, input: &CreateApplicationInput) -> Result<Application> {
        self.get_tenant(input.tenant_id).await?;
        let app = self.applications.create(input).await?;
        self.rbac.seed_system_roles(app.id).await?;
        Ok(app)
    }

    pub async fn get_application(&self, id: StringUuid) -> Result<Application> {
        self.applications
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))
    }

    pub async fn list_applications(&self, offset: i64, limit: i64) -> Result<Vec<Application>> {
        self.applications.list(offset, limit).await
    }

    pub async fn list_tenant_applications(&self, tenant_id: StringUuid) -> Result<Vec<Application>> {
        self.applications.list_by_tenant(tenant_id).await
    }

    pub async fn update_application(
        &self,
        id: StringUuid,
        input: &UpdateApplicationInput,
    ) -> Result<Application> {
        self.applications.update(id, input).await
    }

    pub async fn delete_application(&self, id: StringUuid) -> Result<()> {
        self.applications.delete(id).await
    }

    // ==================== OAuth provider configs ====================

    pub async fn upsert_oauth_config(
        &self,
        app_id: StringUuid,
        input: &UpsertOAuthConfigInput,
    ) -> Result<OAuthProviderConfig> {
        self.get_application(app_id).await?;

        let mut input = input.clone();
        if let Some(key) = &self.encryption_key {
            input.client_secret = aes::encrypt(key, &input.client_secret)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Secret encryption: {}", e)))?;
        }
        self.oauth_configs.upsert(app_id, &input).await
    }

    pub async fn list_oauth_configs(&self, app_id: StringUuid) -> Result<Vec<OAuthProviderConfig>> {
        self.oauth_configs.list_by_app(app_id).await
    }

    /// Fetch a provider config with its client secret decrypted, for the
    /// social-login flows.
    pub async fn oauth_config_with_secret(
        &self,
        app_id: StringUuid,
        provider: &str,
    ) -> Result<OAuthProviderConfig> {
        let mut config = self
            .oauth_configs
            .find(app_id, provider)
            .await?
            .filter(|c| c.is_enabled)
            .ok_or_else(|| {
                AppError::NotFound(format!("Provider {} is not configured", provider))
            })?;

        if let Some(key) = &self.encryption_key {
            config.client_secret = aes::decrypt(key, &config.client_secret)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Secret decryption: {}", e)))?;
        }
        Ok(config)
    }

    pub async fn delete_oauth_config(&self, app_id: StringUuid, provider: &str) -> Result<()> {
        self.oauth_configs.delete(app_id, provider).await
    }

    // ==================== User administration ====================

    pub async fn list_users(
        &self,
        app_id: StringUuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>> {
        self.users.list_by_app(app_id, offset, limit).await
    }

    pub async fn count_users(&self, app_id: StringUuid) -> Result<i64> {
        self.users.count_by_app(app_id).await
    }

    pub async fn get_user(&self, app_id: StringUuid, user_id: StringUuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.app_id == app_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    /// Remove a user; the caller is responsible for revoking tokens first
    pub async fn delete_user(&self, app_id: StringUuid, user_id: StringUuid) -> Result<()> {
        self.get_user(app_id, user_id).await?;
        self.users.delete(user_id).await
    }

    /// Activate or deactivate an account. Deactivation sends a
    /// notification (best-effort).
    pub async fn set_user_active(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        active: bool,
    ) -> Result<()> {
        let user = self.get_user(app_id, user_id).await?;
        self.users.set_active(user_id, active).await?;

        if !active {
            let mut variables = HashMap::new();
            variables.insert("email".to_string(), user.email.clone());
            if let Err(e) = self
                .email
                .send(
                    Some(app_id),
                    EmailType::AccountDeactivated,
                    &user.email,
                    &variables,
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to send deactivation notice");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::repository::application::MockApplicationRepository;
    use crate::repository::oauth_config::MockOAuthConfigRepository;
    use crate::repository::rbac::MockRbacRepository;
    use crate::repository::tenant::MockTenantRepository;
    use crate::repository::user::MockUserRepository;
    use crate::service::email::MockEmailSender;
    use chrono::Utc;

    fn sample_tenant(id: StringUuid) -> Tenant {
        Tenant {
            id,
            name: "Acme Org".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_app(id: StringUuid) -> Application {
        Application {
            id,
            tenant_id: StringUuid::new_v4(),
            name: "Acme".to_string(),
            description: None,
            two_fa_enabled: false,
            two_fa_required: false,
            two_fa_methods: String::new(),
            two_fa_issuer_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn build(
        tenants: MockTenantRepository,
        applications: MockApplicationRepository,
        oauth: MockOAuthConfigRepository,
        rbac_repo: MockRbacRepository,
        key: Option<EncryptionKey>,
    ) -> ControlPlaneService {
        let mut email = MockEmailSender::new();
        email.expect_send().returning(|_, _, _, _| Ok(()));
        ControlPlaneService::new(
            Arc::new(tenants),
            Arc::new(applications),
            Arc::new(oauth),
            Arc::new(MockUserRepository::new()),
            Arc::new(RbacService::new(
                Arc::new(rbac_repo),
                Arc::new(MemoryKvStore::new()),
            )),
            Arc::new(email),
            key,
        )
    }

    #[tokio::test]
    async fn test_create_application_seeds_roles() {
        let tenant_id = StringUuid::new_v4();

        let mut tenants = MockTenantRepository::new();
        tenants
            .expect_find_by_id()
            .returning(move |id| Ok(Some(sample_tenant(id))));

        let mut applications = MockApplicationRepository::new();
        applications
            .expect_create()
            .returning(|input| {
                let mut app = sample_app(StringUuid::new_v4());
                app.tenant_id = input.tenant_id;
                Ok(app)
            });

        let mut rbac_repo = MockRbacRepository::new();
        rbac_repo.expect_seed_system_roles().times(1).returning(|_| Ok(()));

        let svc = build(
            tenants,
            applications,
            MockOAuthConfigRepository::new(),
            rbac_repo,
            None,
        );

        let app = svc
            .create_application(&CreateApplicationInput {
                tenant_id,
                name: "Acme".to_string(),
                description: None,
                two_fa_enabled: false,
                two_fa_required: false,
                two_fa_methods: vec![],
                two_fa_issuer_name: None,
            })
            .await
            .unwrap();
        assert_eq!(app.tenant_id, tenant_id);
    }

    #[tokio::test]
    async fn test_oauth_secret_encrypted_roundtrip() {
        let app_id = StringUuid::new_v4();
        let key = EncryptionKey::new([3u8; 32]);

        let mut applications = MockApplicationRepository::new();
        applications
            .expect_find_by_id()
            .returning(move |id| Ok(Some(sample_app(id))));

        let mut oauth = MockOAuthConfigRepository::new();
        // The stored secret is the encrypted form
        oauth.expect_upsert().returning(|app_id, input| {
            assert!(input.client_secret.contains(':'));
            assert_ne!(input.client_secret, "plain-secret");
            Ok(OAuthProviderConfig {
                id: StringUuid::new_v4(),
                app_id,
                provider: input.provider.clone(),
                client_id: input.client_id.clone(),
                client_secret: input.client_secret.clone(),
                redirect_url: input.redirect_url.clone(),
                is_enabled: input.is_enabled,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        });
        let stored = Arc::new(std::sync::Mutex::new(String::new()));
        let stored_clone = stored.clone();
        oauth.expect_find().returning(move |app_id, provider| {
            let secret = stored_clone.lock().unwrap().clone();
            Ok(Some(OAuthProviderConfig {
                id: StringUuid::new_v4(),
                app_id,
                provider: provider.to_string(),
                client_id: "client".to_string(),
                client_secret: secret,
                redirect_url: "https://app.example.com/cb".to_string(),
                is_enabled: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });

        let svc = build(
            MockTenantRepository::new(),
            applications,
            oauth,
            MockRbacRepository::new(),
            Some(key),
        );

        let created = svc
            .upsert_oauth_config(
                app_id,
                &UpsertOAuthConfigInput {
                    provider: "google".to_string(),
                    client_id: "client".to_string(),
                    client_secret: "plain-secret".to_string(),
                    redirect_url: "https://app.example.com/cb".to_string(),
                    is_enabled: true,
                },
            )
            .await
            .unwrap();
        *stored.lock().unwrap() = created.client_secret.clone();

        // Reading it back through the secret-aware accessor decrypts
        let config = svc.oauth_config_with_secret(app_id, "google").await.unwrap();
        assert_eq!(config.client_secret, "plain-secret");
    }

    #[tokio::test]
    async fn test_disabled_provider_not_served() {
        let mut oauth = MockOAuthConfigRepository::new();
        oauth.expect_find().returning(|app_id, provider| {
            Ok(Some(OAuthProviderConfig {
                id: StringUuid::new_v4(),
                app_id,
                provider: provider.to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                redirect_url: "https://app.example.com/cb".to_string(),
                is_enabled: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });

        let svc = build(
            MockTenantRepository::new(),
            MockApplicationRepository::new(),
            oauth,
            MockRbacRepository::new(),
            None,
        );

        let result = svc
            .oauth_config_with_secret(StringUuid::new_v4(), "google")
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
