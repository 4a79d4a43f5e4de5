//! Server initialization, routing, and background workers

use crate::api;
use crate::config::Config;
use crate::crypto::aes::EncryptionKey;
use crate::error::Result as AppResult;
use crate::jwt::TokenService;
use crate::kv::{KvOperations, RedisKvStore};
use crate::middleware::api_key::{require_admin_key, require_app_key, ApiKeyAuthState};
use crate::middleware::auth::{require_user_auth, AuthState};
use crate::middleware::authorize::{require_permission, require_roles, PermissionGuard, RoleGuard};
use crate::middleware::client_ip::inject_client_ip;
use crate::middleware::csrf::{csrf_protect, CsrfState};
use crate::middleware::path_guard::app_path_guard;
use crate::middleware::rate_limit::{
    presets, rate_limit_middleware, run_evictor, RateLimitLayerState, RateLimitRule, RateLimiter,
};
use crate::middleware::security_headers::{security_headers_middleware, SecurityHeadersConfig};
use crate::middleware::session::{require_admin_session, SessionAuthState};
use crate::middleware::tenant::resolve_application;
use crate::repository::{
    ActivityLogRepositoryImpl, AdminAccountRepositoryImpl, ApiKeyRepository, ApiKeyRepositoryImpl,
    ApplicationRepositoryImpl, EmailRepository, EmailRepositoryImpl,
    FederatedIdentityRepositoryImpl, OAuthConfigRepositoryImpl, RbacRepositoryImpl,
    SystemSettingsRepositoryImpl, TenantRepositoryImpl, UserRepositoryImpl,
};
use crate::service::activity::{run_sweeper, ActivityLogEngine};
use crate::service::federated::{FederatedService, ProviderGateway, UnconfiguredGateway};
use crate::service::{
    AdminSessionService, ApiKeyService, ControlPlaneService, EmailOrchestrator, IdentityService,
    RbacService, SystemSettingsService, TwoFactorService,
};
use anyhow::Result;
use axum::http::HeaderValue;
use axum::{
    middleware::from_fn,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: MySqlPool,
    pub kv: Arc<dyn KvOperations>,
    pub tokens: TokenService,
    pub rate_limiter: RateLimiter,
    pub identity: Arc<IdentityService>,
    pub two_factor: Arc<TwoFactorService>,
    pub federated: Arc<FederatedService>,
    pub rbac: Arc<RbacService>,
    pub activity: Arc<ActivityLogEngine>,
    pub api_keys: Arc<ApiKeyService>,
    pub api_key_repo: Arc<dyn ApiKeyRepository>,
    pub admin_sessions: Arc<AdminSessionService>,
    pub control: Arc<ControlPlaneService>,
    pub settings: Arc<SystemSettingsService>,
    pub email_repo: Arc<dyn EmailRepository>,
    pub provider_gateway: Arc<dyn ProviderGateway>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire all services over the given infrastructure. Shared by the
    /// production entry point and the integration test harness (which
    /// passes an in-memory KV store and a lazy pool).
    pub fn build(
        config: Config,
        db_pool: MySqlPool,
        kv: Arc<dyn KvOperations>,
        rate_limiter: RateLimiter,
        provider_gateway: Arc<dyn ProviderGateway>,
        prometheus: Option<PrometheusHandle>,
    ) -> AppResult<Self> {
        let config = Arc::new(config);
        let tokens = TokenService::new(&config.jwt)?;

        // Repositories
        let tenant_repo = Arc::new(TenantRepositoryImpl::new(db_pool.clone()));
        let application_repo = Arc::new(ApplicationRepositoryImpl::new(db_pool.clone()));
        let oauth_repo = Arc::new(OAuthConfigRepositoryImpl::new(db_pool.clone()));
        let user_repo = Arc::new(UserRepositoryImpl::new(db_pool.clone()));
        let federated_repo = Arc::new(FederatedIdentityRepositoryImpl::new(db_pool.clone()));
        let admin_repo = Arc::new(AdminAccountRepositoryImpl::new(db_pool.clone()));
        let api_key_repo: Arc<dyn ApiKeyRepository> =
            Arc::new(ApiKeyRepositoryImpl::new(db_pool.clone()));
        let rbac_repo = Arc::new(RbacRepositoryImpl::new(db_pool.clone()));
        let activity_repo = Arc::new(ActivityLogRepositoryImpl::new(db_pool.clone()));
        let email_repo: Arc<dyn EmailRepository> =
            Arc::new(EmailRepositoryImpl::new(db_pool.clone()));
        let settings_repo = Arc::new(SystemSettingsRepositoryImpl::new(db_pool.clone()));

        // Services
        let activity = Arc::new(ActivityLogEngine::new(
            activity_repo,
            kv.clone(),
            config.activity.clone(),
        ));
        let rbac = Arc::new(RbacService::new(rbac_repo, kv.clone()));
        let email = Arc::new(EmailOrchestrator::new(
            email_repo.clone(),
            application_repo.clone(),
            config.email.clone(),
        ));
        let two_factor = Arc::new(TwoFactorService::new(
            user_repo.clone(),
            kv.clone(),
            email.clone(),
            activity.clone(),
        ));
        let identity = Arc::new(IdentityService::new(
            user_repo.clone(),
            application_repo.clone(),
            federated_repo.clone(),
            kv.clone(),
            tokens.clone(),
            rbac.clone(),
            two_factor.clone(),
            email.clone(),
            activity.clone(),
            rate_limiter.clone(),
            config.cors.frontend_url.clone(),
        ));
        let federated = Arc::new(FederatedService::new(
            user_repo.clone(),
            application_repo.clone(),
            federated_repo,
            identity.clone(),
            activity.clone(),
        ));
        let api_keys = Arc::new(ApiKeyService::new(api_key_repo.clone()));
        let admin_sessions = Arc::new(AdminSessionService::new(
            admin_repo,
            kv.clone(),
            config.admin.session_ttl_secs,
        ));

        let encryption_key = EncryptionKey::from_env().ok();
        if encryption_key.is_none() {
            info!("SETTINGS_ENCRYPTION_KEY not set, provider secrets are stored in plaintext");
        }
        let control = Arc::new(ControlPlaneService::new(
            tenant_repo,
            application_repo,
            oauth_repo,
            user_repo,
            rbac.clone(),
            email,
            encryption_key,
        ));
        let settings = Arc::new(SystemSettingsService::new(settings_repo));

        Ok(Self {
            config,
            db_pool,
            kv,
            tokens,
            rate_limiter,
            identity,
            two_factor,
            federated,
            rbac,
            activity,
            api_keys,
            api_key_repo,
            admin_sessions,
            control,
            settings,
            email_repo,
            provider_gateway,
            prometheus,
        })
    }
}

/// Build the full router. Route groups compose exactly the guards they
/// need; within one request the chain is strictly sequential.
pub fn build_router(state: AppState) -> Router {
    let auth_state = AuthState {
        tokens: state.tokens.clone(),
        kv: state.kv.clone(),
    };
    let api_key_state = ApiKeyAuthState {
        api_keys: state.api_key_repo.clone(),
        static_admin_key: state.config.admin.api_key.clone(),
    };
    let session_state = SessionAuthState {
        kv: state.kv.clone(),
    };
    let csrf_state = CsrfState {
        kv: state.kv.clone(),
        session_ttl_secs: state.config.admin.session_ttl_secs,
    };

    let rl = |rule: RateLimitRule| {
        from_fn_with_state(
            RateLimitLayerState {
                limiter: state.rate_limiter.clone(),
                rule,
            },
            rate_limit_middleware,
        )
    };

    // ---- /auth: registration, login, recovery, 2FA, social ----
    let auth_public = Router::new()
        .merge(
            Router::new()
                .route("/register", post(api::auth::register))
                .route_layer(rl(presets::register())),
        )
        .merge(
            Router::new()
                .route("/login", post(api::auth::login))
                .route_layer(rl(presets::login())),
        )
        .merge(
            Router::new()
                .route("/refresh-token", post(api::auth::refresh_token))
                .route_layer(rl(presets::refresh())),
        )
        .merge(
            Router::new()
                .route("/forgot-password", post(api::auth::forgot_password))
                .route_layer(rl(presets::forgot_password())),
        )
        .merge(
            Router::new()
                .route("/reset-password", post(api::auth::reset_password))
                .route_layer(rl(presets::reset_password())),
        )
        .merge(
            Router::new()
                .route("/2fa/login", post(api::two_factor::login))
                .route_layer(rl(presets::two_fa_verify())),
        )
        .route("/verify-email", get(api::auth::verify_email))
        .route("/{provider}/login", get(api::social::login))
        .route("/{provider}/callback", get(api::social::callback));

    // Enrollment verification keeps the rate limit outermost, matching the
    // guard order of the login pipeline
    let two_fa_verify = Router::new()
        .route("/2fa/verify", post(api::two_factor::verify))
        .route_layer(from_fn_with_state(auth_state.clone(), require_user_auth))
        .route_layer(rl(presets::two_fa_verify()));

    let auth_private = Router::new()
        .route("/logout", post(api::auth::logout))
        .route("/2fa/enable", post(api::two_factor::enable))
        .route("/2fa/disable", post(api::two_factor::disable))
        .route("/2fa/recovery-codes", post(api::two_factor::recovery_codes))
        .route_layer(from_fn_with_state(auth_state.clone(), require_user_auth))
        .merge(two_fa_verify);

    let auth_routes = Router::new()
        .merge(auth_public)
        .merge(auth_private)
        .route_layer(from_fn(resolve_application));

    // ---- /profile: the authenticated user's own record ----
    let profile_routes = Router::new()
        .route(
            "/",
            get(api::profile::get_profile)
                .put(api::profile::update_profile)
                .delete(api::profile::delete_account),
        )
        .route("/email", put(api::profile::change_email))
        .route("/password", put(api::profile::change_password))
        .route("/identities", get(api::profile::list_identities))
        .route_layer(from_fn_with_state(auth_state.clone(), require_user_auth))
        .route_layer(from_fn(resolve_application));

    // ---- /users: app-level directory behind RBAC guards ----
    let users_routes = Router::new()
        .merge(
            Router::new()
                .route("/", get(api::users::list_users))
                .route_layer(from_fn_with_state(
                    RoleGuard {
                        rbac: state.rbac.clone(),
                        required: &["admin"],
                    },
                    require_roles,
                )),
        )
        .merge(
            Router::new()
                .route("/{user_id}", get(api::users::get_user))
                .route_layer(from_fn_with_state(
                    PermissionGuard {
                        rbac: state.rbac.clone(),
                        resource: "users",
                        action: "read",
                    },
                    require_permission,
                )),
        )
        .route_layer(from_fn_with_state(auth_state, require_user_auth))
        .route_layer(from_fn(resolve_application));

    // ---- /app/{id}: machine access with an app API key ----
    let app_routes = Router::new()
        .route("/{id}/config", get(api::app::get_config))
        .route("/{id}/users", get(api::app::list_users))
        .route("/{id}/users/{user_id}", get(api::app::get_user))
        .route_layer(from_fn(app_path_guard))
        .route_layer(from_fn_with_state(api_key_state.clone(), require_app_key))
        .route_layer(from_fn(resolve_application));

    // ---- /admin: control plane behind the admin API key ----
    let admin_routes = Router::new()
        .route("/tenants", post(api::admin::create_tenant).get(api::admin::list_tenants))
        .route(
            "/tenants/{id}",
            get(api::admin::get_tenant)
                .put(api::admin::update_tenant)
                .delete(api::admin::delete_tenant),
        )
        .route(
            "/tenants/{id}/applications",
            get(api::admin::list_tenant_applications),
        )
        .route(
            "/applications",
            post(api::admin::create_application).get(api::admin::list_applications),
        )
        .route(
            "/applications/{id}",
            get(api::admin::get_application)
                .put(api::admin::update_application)
                .delete(api::admin::delete_application),
        )
        .route(
            "/applications/{id}/oauth",
            put(api::admin::upsert_oauth_config).get(api::admin::list_oauth_configs),
        )
        .route(
            "/applications/{id}/oauth/{provider}",
            delete(api::admin::delete_oauth_config),
        )
        .route("/applications/{id}/users", get(api::admin::list_app_users))
        .route(
            "/applications/{id}/users/{user_id}",
            get(api::admin::get_app_user).delete(api::admin::delete_app_user),
        )
        .route(
            "/applications/{id}/users/{user_id}/status",
            put(api::admin::set_user_status),
        )
        .route(
            "/applications/{id}/roles",
            post(api::admin::create_role).get(api::admin::list_roles),
        )
        .route("/applications/{id}/roles/assign", post(api::admin::assign_role))
        .route("/applications/{id}/roles/remove", post(api::admin::remove_role))
        .route("/roles/{id}", delete(api::admin::delete_role))
        .route("/roles/{id}/permissions", get(api::admin::list_role_permissions))
        .route(
            "/roles/{id}/permissions/{permission_id}",
            post(api::admin::attach_permission).delete(api::admin::detach_permission),
        )
        .route(
            "/permissions",
            get(api::admin::list_permissions).post(api::admin::create_permission),
        )
        .route(
            "/applications/{id}/api-keys",
            get(api::admin::list_app_api_keys),
        )
        .route(
            "/api-keys",
            post(api::admin::create_api_key).get(api::admin::list_api_keys),
        )
        .route("/api-keys/{id}/revoke", post(api::admin::revoke_api_key))
        .route("/activity-logs", get(api::admin::list_activity_logs))
        .route("/activity-logs/sweep", post(api::admin::sweep_activity_logs))
        .route(
            "/activity-logs/users/{user_id}",
            delete(api::admin::delete_user_logs),
        )
        .route(
            "/email/templates",
            put(api::admin::upsert_email_template).get(api::admin::list_email_templates),
        )
        .route("/email/templates/{id}", delete(api::admin::delete_email_template))
        .route(
            "/email/servers",
            put(api::admin::upsert_email_server).get(api::admin::list_email_servers),
        )
        .route("/email/servers/{id}", delete(api::admin::delete_email_server))
        .route(
            "/settings",
            get(api::admin::list_settings).put(api::admin::upsert_setting),
        )
        .route(
            "/settings/{key}",
            get(api::admin::get_setting).delete(api::admin::delete_setting),
        )
        .route(
            "/accounts",
            post(api::admin::create_admin_account).get(api::admin::list_admin_accounts),
        )
        .route("/accounts/{id}", delete(api::admin::delete_admin_account))
        .route_layer(from_fn_with_state(api_key_state, require_admin_key));

    // ---- /gui: session-cookie admin surface ----
    let gui_public = Router::new()
        .route("/login", post(api::gui::login))
        .route_layer(rl(presets::gui_login()));

    let gui_private = Router::new()
        .route("/logout", post(api::gui::logout))
        .route("/me", get(api::gui::me))
        .route("/password", put(api::gui::change_password))
        .route("/csrf", get(api::gui::csrf))
        .route_layer(from_fn_with_state(csrf_state, csrf_protect))
        .route_layer(from_fn_with_state(session_state, require_admin_session));

    let gui_routes = Router::new().merge(gui_public).merge(gui_private);

    let security_headers = SecurityHeadersConfig {
        hsts_enabled: state.config.is_production(),
        ..Default::default()
    };

    Router::new()
        .route("/health", get(api::health::health))
        .route("/health/ready", get(api::health::ready))
        .route("/metrics", get(api::health::metrics))
        .nest("/auth", auth_routes)
        .nest("/profile", profile_routes)
        .nest("/users", users_routes)
        .nest("/app", app_routes)
        .nest("/admin", admin_routes)
        .nest("/gui", gui_routes)
        // Layers apply bottom-to-top: the last `.layer()` call is the
        // outermost and runs first. Security headers wrap everything so even
        // CORS-short-circuited responses carry them, then CORS handles
        // preflights, then the client IP is injected for the inner guards.
        .layer(from_fn(inject_client_ip))
        .layer(build_cors(&state.config))
        .layer(from_fn_with_state(security_headers, security_headers_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors(config: &Config) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    if let Some(url) = &config.cors.frontend_url {
        if let Ok(value) = url.parse() {
            origins.push(value);
        }
    }
    for origin in &config.cors.extra_origins {
        if let Ok(value) = origin.parse() {
            origins.push(value);
        }
    }

    if origins.is_empty() {
        // Development convenience; production requires FRONTEND_URL at
        // startup (Config::validate)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Run the server
pub async fn run(config: Config, prometheus_handle: Option<PrometheusHandle>) -> Result<()> {
    let db_pool = MySqlPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await?;
    info!("Connected to database");

    let redis = RedisKvStore::new(&config.redis.url).await?;
    info!("Connected to the shared KV store");

    let rate_limiter = RateLimiter::new(
        Some(redis.connection_manager()),
        config.rate_limit.enabled,
    );
    let kv: Arc<dyn KvOperations> = Arc::new(redis);

    let addr = config.http_addr();
    let state = AppState::build(
        config,
        db_pool,
        kv,
        rate_limiter.clone(),
        Arc::new(UnconfiguredGateway),
        prometheus_handle,
    )?;

    // Background workers cooperate with shutdown through a watch channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_sweeper(state.activity.clone(), shutdown_rx.clone()));
    let evictor = tokio::spawn(run_evictor(rate_limiter.fallback_store(), shutdown_rx));

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Let in-flight worker batches finish
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(sweeper, evictor);
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// One-off sweep for the `sweep-logs` CLI subcommand
pub async fn sweep_activity_logs(config: &Config) -> Result<u64> {
    let db_pool = MySqlPoolOptions::new()
        .max_connections(1)
        .connect(&config.database.url)
        .await?;

    let engine = ActivityLogEngine::new(
        Arc::new(ActivityLogRepositoryImpl::new(db_pool)),
        Arc::new(crate::kv::MemoryKvStore::new()),
        config.activity.clone(),
    );
    Ok(engine.sweep_once().await?)
}
