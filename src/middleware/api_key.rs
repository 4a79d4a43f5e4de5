//! API key authentication guards
//!
//! Admin keys authenticate control-plane routes: a statically configured
//! key is compared in constant time first, then the key store is consulted
//! by SHA-256 hash. App keys authenticate one application's machine calls
//! and must match the tenant-resolved application. `last_used_at` updates
//! are fire-and-forget.

use crate::crypto::{constant_time_eq, sha256_hex};
use crate::domain::{ApiKeyType, StringUuid};
use crate::middleware::tenant::AppContext;
use crate::repository::ApiKeyRepository;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";
pub const APP_KEY_HEADER: &str = "x-app-api-key";

#[derive(Clone)]
pub struct ApiKeyAuthState {
    pub api_keys: Arc<dyn ApiKeyRepository>,
    /// Statically configured admin key, checked before any store lookup
    pub static_admin_key: Option<String>,
}

/// Control-plane caller. `key_id` is `None` for the static configured key.
#[derive(Debug, Clone)]
pub struct AdminPrincipal {
    pub key_id: Option<StringUuid>,
}

/// Application-scoped machine caller
#[derive(Debug, Clone)]
pub struct AppKeyPrincipal {
    pub key_id: StringUuid,
    pub app_id: StringUuid,
}

pub async fn require_admin_key(
    State(state): State<ApiKeyAuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let presented = match header_value(&request, ADMIN_KEY_HEADER) {
        Some(v) => v,
        None => return unauthorized("Missing X-Admin-API-Key header"),
    };

    if let Some(ref static_key) = state.static_admin_key {
        if constant_time_eq(static_key.as_bytes(), presented.as_bytes()) {
            request
                .extensions_mut()
                .insert(AdminPrincipal { key_id: None });
            return next.run(request).await;
        }
    }

    let hash = sha256_hex(&presented);
    let key = match state.api_keys.find_by_hash(&hash).await {
        Ok(Some(key)) => key,
        Ok(None) => return unauthorized("Invalid API key"),
        Err(e) => return e.into_response(),
    };

    if key.key_type() != Some(ApiKeyType::Admin) {
        return unauthorized("Invalid API key");
    }
    if !key.is_active(Utc::now()) {
        return unauthorized("API key is revoked or expired");
    }

    touch_last_used(state.api_keys.clone(), key.id);
    request.extensions_mut().insert(AdminPrincipal {
        key_id: Some(key.id),
    });
    next.run(request).await
}

pub async fn require_app_key(
    State(state): State<ApiKeyAuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let app_ctx = match request.extensions().get::<AppContext>() {
        Some(ctx) => *ctx,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "X-App-ID header is required" })),
            )
                .into_response()
        }
    };

    let presented = match header_value(&request, APP_KEY_HEADER) {
        Some(v) => v,
        None => return unauthorized("Missing X-App-API-Key header"),
    };

    let hash = sha256_hex(&presented);
    let key = match state.api_keys.find_by_hash(&hash).await {
        Ok(Some(key)) => key,
        Ok(None) => return unauthorized("Invalid API key"),
        Err(e) => return e.into_response(),
    };

    if key.key_type() != Some(ApiKeyType::App) {
        return unauthorized("Invalid API key");
    }
    if !key.is_active(Utc::now()) {
        return unauthorized("API key is revoked or expired");
    }
    if key.app_id != Some(app_ctx.0) {
        return unauthorized("API key does not match the application");
    }

    touch_last_used(state.api_keys.clone(), key.id);
    request.extensions_mut().insert(AppKeyPrincipal {
        key_id: key.id,
        app_id: app_ctx.0,
    });
    next.run(request).await
}

fn header_value(request: &Request<Body>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Detached update; must not hold request-scoped resources
fn touch_last_used(repo: Arc<dyn ApiKeyRepository>, key_id: StringUuid) {
    tokio::spawn(async move {
        if let Err(e) = repo.touch_last_used(key_id).await {
            tracing::debug!(key_id = %key_id, error = %e, "Failed to update API key last_used_at");
        }
    });
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}
