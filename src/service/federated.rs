//! External identity adapter
//!
//! Accepts a provider-normalized profile and reconciles it into user and
//! federated-identity records. Token issuance is identical to password
//! login, including the 2FA interplay.

use crate::domain::{
    CreateFederatedIdentityInput, CreateUserInput, EventType, NormalizedProfile, ProfilePatch,
    RefreshFederatedIdentityInput, StringUuid, User,
};
use crate::error::{AppError, Result};
use crate::repository::{ApplicationRepository, FederatedIdentityRepository, UserRepository};
use crate::service::activity::{ActivityLogEngine, EventMeta};
use crate::service::identity::{IdentityService, LoginOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Provider tokens passed alongside the profile
#[derive(Debug, Clone, Default)]
pub struct ProviderTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Boundary to the OAuth provider HTTP clients, which live outside the
/// core. The gateway performs the handshake; the core only consumes
/// normalized profiles.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Provider authorization URL for the front-channel redirect
    fn authorize_url(
        &self,
        config: &crate::domain::OAuthProviderConfig,
        state: &str,
    ) -> Result<String>;

    /// Exchange the authorization code for provider tokens and the
    /// normalized profile
    async fn exchange_code(
        &self,
        config: &crate::domain::OAuthProviderConfig,
        code: &str,
    ) -> Result<(NormalizedProfile, ProviderTokens)>;
}

/// Placeholder used when no gateway is wired in; social routes answer 404.
pub struct UnconfiguredGateway;

#[async_trait::async_trait]
impl ProviderGateway for UnconfiguredGateway {
    fn authorize_url(
        &self,
        _config: &crate::domain::OAuthProviderConfig,
        _state: &str,
    ) -> Result<String> {
        Err(AppError::NotFound(
            "Social login is not configured".to_string(),
        ))
    }

    async fn exchange_code(
        &self,
        _config: &crate::domain::OAuthProviderConfig,
        _code: &str,
    ) -> Result<(NormalizedProfile, ProviderTokens)> {
        Err(AppError::NotFound(
            "Social login is not configured".to_string(),
        ))
    }
}

pub struct FederatedService {
    users: Arc<dyn UserRepository>,
    applications: Arc<dyn ApplicationRepository>,
    federated: Arc<dyn FederatedIdentityRepository>,
    identity: Arc<IdentityService>,
    activity: Arc<ActivityLogEngine>,
}

impl FederatedService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        applications: Arc<dyn ApplicationRepository>,
        federated: Arc<dyn FederatedIdentityRepository>,
        identity: Arc<IdentityService>,
        activity: Arc<ActivityLogEngine>,
    ) -> Self {
        Self {
            users,
            applications,
            federated,
            identity,
            activity,
        }
    }

    fn patch_from(profile: &NormalizedProfile) -> ProfilePatch {
        // A bare `name` splits into first/last when the granular fields are
        // absent
        let (first, last) = match (&profile.first_name, &profile.last_name) {
            (Some(f), l) => (Some(f.clone()), l.clone()),
            (None, Some(l)) => (None, Some(l.clone())),
            (None, None) => match &profile.name {
                Some(name) => {
                    let mut parts = name.splitn(2, ' ');
                    (
                        parts.next().map(|s| s.to_string()),
                        parts.next().map(|s| s.to_string()),
                    )
                }
                None => (None, None),
            },
        };
        ProfilePatch {
            first_name: first,
            last_name: last,
            picture: profile.picture.clone(),
            locale: profile.locale.clone(),
        }
    }

    /// Provider accounts linked to a user (for the profile page)
    pub async fn list_identities(
        &self,
        user_id: StringUuid,
    ) -> Result<Vec<crate::domain::FederatedIdentity>> {
        self.federated.list_by_user(user_id).await
    }

    /// Reconcile a provider login into a local user and issue tokens.
    ///
    /// Resolution order:
    /// 1. existing federated identity → refresh it, fill empty profile
    ///    fields
    /// 2. existing user with the same email → link a new federated identity
    /// 3. otherwise create the user (no password) plus the identity
    pub async fn login(
        &self,
        app_id: StringUuid,
        profile: &NormalizedProfile,
        provider_tokens: ProviderTokens,
        meta: EventMeta,
    ) -> Result<LoginOutcome> {
        let app = self
            .applications
            .find_by_id(app_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Application not found".to_string()))?;

        let provider = profile.provider.as_str().to_string();
        let user = match self
            .federated
            .find(app_id, &provider, &profile.provider_user_id)
            .await?
        {
            Some(existing) => {
                self.federated
                    .refresh(
                        existing.id,
                        &RefreshFederatedIdentityInput {
                            provider_profile: profile.raw.clone(),
                            access_token: provider_tokens.access_token,
                            refresh_token: provider_tokens.refresh_token,
                            expires_at: provider_tokens.expires_at,
                        },
                    )
                    .await?;
                self.users
                    .fill_empty_profile(existing.user_id, &Self::patch_from(profile))
                    .await?;
                self.users
                    .find_by_id(existing.user_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
            }
            None => {
                let user = match self
                    .users
                    .find_by_email(app_id, &profile.email.to_lowercase())
                    .await?
                {
                    Some(user) => {
                        // Linking a provider only fills gaps, never
                        // overwrites the user's own data
                        self.users
                            .fill_empty_profile(user.id, &Self::patch_from(profile))
                            .await?;
                        user
                    }
                    None => self.create_user(app_id, profile).await?,
                };

                self.federated
                    .create(&CreateFederatedIdentityInput {
                        user_id: user.id,
                        app_id,
                        provider: provider.clone(),
                        provider_user_id: profile.provider_user_id.clone(),
                        provider_profile: profile.raw.clone(),
                        access_token: provider_tokens.access_token,
                        refresh_token: provider_tokens.refresh_token,
                        expires_at: provider_tokens.expires_at,
                    })
                    .await?;
                user
            }
        };

        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }

        if let Err(e) = self.users.touch_last_login(user.id).await {
            tracing::debug!(error = %e, "Failed to update last_login_at");
        }

        let mut event_meta = meta.clone();
        event_meta.user_id = Some(user.id);
        event_meta.details = Some(serde_json::json!({ "provider": provider }));
        self.activity.record(EventType::SocialLogin, event_meta);

        // 2FA interplay mirrors password login: an enrolled user is always
        // challenged, regardless of the application's current 2FA setting
        if user.two_fa_enabled {
            let challenge = self
                .identity
                .two_factor_challenge(app_id, &user)
                .await?;
            return Ok(LoginOutcome::TwoFaRequired {
                temp_token: challenge.temp_token,
                method: challenge.method,
            });
        }

        let tokens = self.identity.issue_tokens(app_id, user.id).await?;
        let requires_two_fa_setup = app.two_fa_required && !user.two_fa_enabled;
        Ok(LoginOutcome::Success {
            tokens,
            requires_two_fa_setup,
        })
    }

    /// Providers that assert email verification produce verified users
    async fn create_user(&self, app_id: StringUuid, profile: &NormalizedProfile) -> Result<User> {
        let patch = Self::patch_from(profile);
        let email_verified =
            profile.email_verified || profile.provider.asserts_verified_email();

        self.users
            .create(&CreateUserInput {
                app_id,
                email: profile.email.to_lowercase(),
                password_hash: String::new(),
                email_verified,
                first_name: patch.first_name,
                last_name: patch.last_name,
                picture: patch.picture,
                locale: patch.locale,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActivityConfig, JwtConfig};
    use crate::domain::{FederatedIdentity, Provider};
    use crate::jwt::TokenService;
    use crate::kv::MemoryKvStore;
    use crate::middleware::rate_limit::RateLimiter;
    use crate::repository::activity_log::MockActivityLogRepository;
    use crate::repository::application::MockApplicationRepository;
    use crate::repository::federated::MockFederatedIdentityRepository;
    use crate::repository::rbac::MockRbacRepository;
    use crate::repository::user::MockUserRepository;
    use crate::service::email::MockEmailSender;
    use crate::service::rbac::RbacService;
    use crate::service::two_factor::TwoFactorService;

    fn sample_profile() -> NormalizedProfile {
        NormalizedProfile {
            provider: Provider::Google,
            provider_user_id: "g-123".to_string(),
            email: "Alice@Example.com".to_string(),
            email_verified: true,
            name: Some("Alice Cooper".to_string()),
            first_name: None,
            last_name: None,
            picture: Some("https://img.example.com/a.png".to_string()),
            locale: Some("en".to_string()),
            raw: serde_json::json!({ "sub": "g-123" }),
        }
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

    fn sample_app(app_id: StringUuid) -> crate::domain::Application {
        crate::domain::Application {
            id: app_id,
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

    fn build_service(
        users: MockUserRepository,
        applications: MockApplicationRepository,
        federated: MockFederatedIdentityRepository,
    ) -> FederatedService {
        let kv = Arc::new(MemoryKvStore::new());

        let mut activity_repo = MockActivityLogRepository::new();
        activity_repo.expect_create().returning(|_| Ok(()));
        let activity = Arc::new(ActivityLogEngine::new(
            Arc::new(activity_repo),
            kv.clone(),
            ActivityConfig::default(),
        ));

        let mut rbac_repo = MockRbacRepository::new();
        rbac_repo
            .expect_resolve_user_access()
            .returning(|app_id, user_id| {
                Ok(crate::domain::UserRolesInApp {
                    user_id,
                    app_id,
                    roles: vec![],
                    permissions: vec![],
                })
            });
        let rbac = Arc::new(RbacService::new(Arc::new(rbac_repo), kv.clone()));

        let mut email = MockEmailSender::new();
        email.expect_send().returning(|_, _, _, _| Ok(()));
        let email: Arc<dyn crate::service::email::EmailSender> = Arc::new(email);

        let users: Arc<dyn UserRepository> = Arc::new(users);
        let applications: Arc<dyn ApplicationRepository> = Arc::new(applications);
        let federated: Arc<dyn FederatedIdentityRepository> = Arc::new(federated);

        let two_factor = Arc::new(TwoFactorService::new(
            users.clone(),
            kv.clone(),
            email.clone(),
            activity.clone(),
        ));

        let tokens = TokenService::new(&JwtConfig {
            secret: "test-secret-key-for-testing-purposes-only".to_string(),
            issuer: "authgate-test".to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 2_592_000,
        })
        .unwrap();

        let identity = Arc::new(IdentityService::new(
            users.clone(),
            applications.clone(),
            federated.clone(),
            kv,
            tokens,
            rbac,
            two_factor,
            email,
            activity.clone(),
            RateLimiter::disabled(),
            None,
        ));

        FederatedService::new(users, applications, federated, identity, activity)
    }

    #[tokio::test]
    async fn test_new_user_created_verified_for_asserting_provider() {
        let app_id = StringUuid::new_v4();

        let mut users = MockUserRepository::new();
        users.expect_find_by_email().returning(|_, _| Ok(None));
        users.expect_create().times(1).returning(|input| {
            assert!(input.email_verified);
            assert_eq!(input.email, "alice@example.com");
            assert!(input.password_hash.is_empty());
            assert_eq!(input.first_name.as_deref(), Some("Alice"));
            assert_eq!(input.last_name.as_deref(), Some("Cooper"));
            let mut user = sample_user(input.app_id);
            user.first_name = input.first_name.clone();
            Ok(user)
        });
        users.expect_touch_last_login().returning(|_| Ok(()));

        let mut applications = MockApplicationRepository::new();
        applications
            .expect_find_by_id()
            .returning(move |id| Ok(Some(sample_app(id))));

        let mut federated = MockFederatedIdentityRepository::new();
        federated.expect_find().returning(|_, _, _| Ok(None));
        federated.expect_create().times(1).returning(|input| {
            Ok(FederatedIdentity {
                id: StringUuid::new_v4(),
                user_id: input.user_id,
                app_id: input.app_id,
                provider: input.provider.clone(),
                provider_user_id: input.provider_user_id.clone(),
                provider_profile: Some(input.provider_profile.clone()),
                access_token: None,
                refresh_token: None,
                expires_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        });

        let svc = build_service(users, applications, federated);
        let outcome = svc
            .login(
                app_id,
                &sample_profile(),
                ProviderTokens::default(),
                EventMeta::default(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, LoginOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn test_existing_identity_refreshed() {
        let app_id = StringUuid::new_v4();
        let user = sample_user(app_id);
        let user_id = user.id;
        let identity_id = StringUuid::new_v4();

        let mut users = MockUserRepository::new();
        users
            .expect_fill_empty_profile()
            .times(1)
            .returning(|_, _| Ok(()));
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(user.clone())));
        users.expect_touch_last_login().returning(|_| Ok(()));

        let mut applications = MockApplicationRepository::new();
        applications
            .expect_find_by_id()
            .returning(move |id| Ok(Some(sample_app(id))));

        let mut federated = MockFederatedIdentityRepository::new();
        federated.expect_find().returning(move |app_id, _, _| {
            Ok(Some(FederatedIdentity {
                id: identity_id,
                user_id,
                app_id,
                provider: "google".to_string(),
                provider_user_id: "g-123".to_string(),
                provider_profile: None,
                access_token: None,
                refresh_token: None,
                expires_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });
        federated
            .expect_refresh()
            .times(1)
            .withf(move |id, _| *id == identity_id)
            .returning(|_, _| Ok(()));
        // No new identity is created
        federated.expect_create().times(0);

        let svc = build_service(users, applications, federated);
        let outcome = svc
            .login(
                app_id,
                &sample_profile(),
                ProviderTokens::default(),
                EventMeta::default(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn test_existing_email_gets_linked() {
        let app_id = StringUuid::new_v4();
        let mut user = sample_user(app_id);
        user.first_name = Some("Alicia".to_string());

        let mut users = MockUserRepository::new();
        let user_clone = user.clone();
        users
            .expect_find_by_email()
            .returning(move |_, _| Ok(Some(user_clone.clone())));
        // The existing name is kept (only empty fields are filled)
        users
            .expect_fill_empty_profile()
            .times(1)
            .returning(|_, _| Ok(()));
        users.expect_create().times(0);
        users.expect_touch_last_login().returning(|_| Ok(()));

        let mut applications = MockApplicationRepository::new();
        applications
            .expect_find_by_id()
            .returning(move |id| Ok(Some(sample_app(id))));

        let mut federated = MockFederatedIdentityRepository::new();
        federated.expect_find().returning(|_, _, _| Ok(None));
        federated.expect_create().times(1).returning(|input| {
            Ok(FederatedIdentity {
                id: StringUuid::new_v4(),
                user_id: input.user_id,
                app_id: input.app_id,
                provider: input.provider.clone(),
                provider_user_id: input.provider_user_id.clone(),
                provider_profile: Some(input.provider_profile.clone()),
                access_token: None,
                refresh_token: None,
                expires_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        });

        let svc = build_service(users, applications, federated);
        let outcome = svc
            .login(
                app_id,
                &sample_profile(),
                ProviderTokens::default(),
                EventMeta::default(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn test_enrolled_user_challenged_even_if_app_two_fa_off() {
        let app_id = StringUuid::new_v4();
        let mut user = sample_user(app_id);
        user.two_fa_enabled = true;
        user.two_fa_method = Some("totp".to_string());
        user.two_fa_secret = Some("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string());
        let user_id = user.id;
        let identity_id = StringUuid::new_v4();

        let mut users = MockUserRepository::new();
        users.expect_fill_empty_profile().returning(|_, _| Ok(()));
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(user.clone())));
        users.expect_touch_last_login().returning(|_| Ok(()));

        // The application has 2FA switched off entirely
        let mut applications = MockApplicationRepository::new();
        applications
            .expect_find_by_id()
            .returning(move |id| Ok(Some(sample_app(id))));

        let mut federated = MockFederatedIdentityRepository::new();
        federated.expect_find().returning(move |app_id, _, _| {
            Ok(Some(FederatedIdentity {
                id: identity_id,
                user_id,
                app_id,
                provider: "google".to_string(),
                provider_user_id: "g-123".to_string(),
                provider_profile: None,
                access_token: None,
                refresh_token: None,
                expires_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });
        federated.expect_refresh().returning(|_, _| Ok(()));

        let svc = build_service(users, applications, federated);
        let outcome = svc
            .login(
                app_id,
                &sample_profile(),
                ProviderTokens::default(),
                EventMeta::default(),
            )
            .await
            .unwrap();

        // The enrolled user is still challenged; no token bypass
        assert!(matches!(outcome, LoginOutcome::TwoFaRequired { .. }));
    }

    #[test]
    fn test_patch_splits_bare_name() {
        let profile = sample_profile();
        let patch = FederatedService::patch_from(&profile);
        assert_eq!(patch.first_name.as_deref(), Some("Alice"));
        assert_eq!(patch.last_name.as_deref(), Some("Cooper"));

        let mut granular = sample_profile();
        granular.first_name = Some("Al".to_string());
        let patch = FederatedService::patch_from(&granular);
        assert_eq!(patch.first_name.as_deref(), Some("Al"));
        assert_eq!(patch.last_name, None);
    }
}
