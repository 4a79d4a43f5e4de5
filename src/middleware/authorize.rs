//! Authorization guards
//!
//! `RoleGuard` admits callers holding one of the required roles: the fast
//! path reads roles embedded in the token, the slow path resolves RBAC
//! through the cached lookup. `PermissionGuard` always resolves through
//! the RBAC cache.

use crate::middleware::auth::CurrentUser;
use crate::service::rbac::RbacService;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct RoleGuard {
    pub rbac: Arc<RbacService>,
    pub required: &'static [&'static str],
}

#[derive(Clone)]
pub struct PermissionGuard {
    pub rbac: Arc<RbacService>,
    pub resource: &'static str,
    pub action: &'static str,
}

pub async fn require_roles(
    State(guard): State<RoleGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<CurrentUser>().cloned() else {
        return unauthorized();
    };

    // Fast path: roles pre-resolved into the token
    if guard
        .required
        .iter()
        .any(|r| user.roles.iter().any(|have| have == r))
    {
        return next.run(request).await;
    }

    // Slow path: cached RBAC lookup
    match guard.rbac.user_access(user.app_id, user.user_id).await {
        Ok(access) => {
            if guard.required.iter().any(|r| access.has_role(r)) {
                next.run(request).await
            } else {
                forbidden("Insufficient role")
            }
        }
        Err(e) => e.into_response(),
    }
}

pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<CurrentUser>().cloned() else {
        return unauthorized();
    };

    match guard.rbac.user_access(user.app_id, user.user_id).await {
        Ok(access) => {
            if access.has_permission(guard.resource, guard.action) {
                next.run(request).await
            } else {
                forbidden("Permission denied")
            }
        }
        Err(e) => e.into_response(),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Authentication required" })),
    )
        .into_response()
}

fn forbidden(message: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
}
