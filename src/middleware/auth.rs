//! Bearer-token authentication guard
//!
//! Parses the access token, enforces the token-type discipline, consults
//! the token and user blacklists, and populates [`CurrentUser`]. Blacklist
//! checks fail closed: if the KV store is unreachable after one retry the
//! request is rejected rather than letting revoked tokens through.

use crate::jwt::{TokenService, TOKEN_TYPE_ACCESS};
use crate::kv::{token_digest, KvOperations};
use crate::middleware::tenant::AppContext;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::domain::StringUuid;

/// Shared state for the bearer-token guard
#[derive(Clone)]
pub struct AuthState {
    pub tokens: TokenService,
    pub kv: Arc<dyn KvOperations>,
}

/// The authenticated principal, available to handlers as an extractor
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: StringUuid,
    pub app_id: StringUuid,
    /// Roles embedded in the token (fast path for role checks)
    pub roles: Vec<String>,
    /// SHA-256 digest of the presented token, used for logout blacklisting
    pub token_digest: String,
    /// Expiry claim, used to compute the remaining blacklist TTL
    pub token_exp: i64,
}

fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Result<&str, Response> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized("Missing authorization token"))?
        .to_str()
        .map_err(|_| unauthorized("Invalid authorization header encoding"))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Authorization header must use Bearer scheme"))
}

pub async fn require_user_auth(
    State(auth): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer_token(request.headers()) {
        Ok(t) => t.to_string(),
        Err(response) => return response,
    };

    let claims = match auth.tokens.parse(&token) {
        Ok(c) => c,
        Err(_) => return unauthorized("Invalid or expired token"),
    };

    // Access-token consumers reject refresh tokens
    if TokenService::ensure_type(&claims, TOKEN_TYPE_ACCESS).is_err() {
        return unauthorized("Invalid token type");
    }

    let (user_id, app_id) = match (claims.user_id(), claims.app_id()) {
        (Ok(u), Ok(a)) => (u, a),
        _ => return unauthorized("Invalid token claims"),
    };

    // The token must belong to the tenant-resolved application
    if let Some(ctx) = request.extensions().get::<AppContext>() {
        if ctx.0 != app_id {
            return unauthorized("Token does not belong to this application");
        }
    }

    let digest = token_digest(&token);

    match is_revoked(auth.kv.as_ref(), app_id, user_id, &digest).await {
        Ok(true) => return unauthorized("Token has been revoked"),
        Ok(false) => {}
        Err(response) => return response,
    }

    request.extensions_mut().insert(CurrentUser {
        user_id,
        app_id,
        roles: claims.roles,
        token_digest: digest,
        token_exp: claims.exp,
    });

    next.run(request).await
}

/// Consult both blacklists with one retry before failing closed
async fn is_revoked(
    kv: &dyn KvOperations,
    app_id: StringUuid,
    user_id: StringUuid,
    digest: &str,
) -> Result<bool, Response> {
    for attempt in 0..2 {
        let token_check = kv.is_token_blacklisted(app_id, digest).await;
        let user_check = kv.is_user_blacklisted(app_id, user_id).await;
        match (token_check, user_check) {
            (Ok(t), Ok(u)) => return Ok(t || u),
            _ if attempt == 0 => continue,
            _ => {
                tracing::error!("Blacklist check failed after retry, rejecting (fail-closed)");
                return Err(internal("Authentication service temporarily unavailable"));
            }
        }
    }
    unreachable!()
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

fn internal(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| unauthorized("Authentication required"))
    }
}
