//! Admin GUI session guard
//!
//! Reads the HTTP-only session cookie, looks the session up in the KV
//! store, and populates the admin context. Anything invalid redirects to
//! the login page.

use crate::domain::AdminSession;
use crate::kv::KvOperations;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "authgate_admin_session";
const LOGIN_PATH: &str = "/gui/login";

#[derive(Clone)]
pub struct SessionAuthState {
    pub kv: Arc<dyn KvOperations>,
}

/// The authenticated admin GUI session
#[derive(Debug, Clone)]
pub struct AdminSessionContext {
    pub session_id: String,
    pub session: AdminSession,
}

pub async fn require_admin_session(
    State(state): State<SessionAuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Redirect::to(LOGIN_PATH).into_response();
    };
    let session_id = cookie.value().to_string();

    let payload = match state.kv.get_admin_session(&session_id).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return Redirect::to(LOGIN_PATH).into_response(),
        Err(e) => return e.into_response(),
    };

    let session: AdminSession = match serde_json::from_str(&payload) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Corrupt admin session payload, forcing re-login");
            let _ = state.kv.delete_admin_session(&session_id).await;
            return Redirect::to(LOGIN_PATH).into_response();
        }
    };

    request.extensions_mut().insert(AdminSessionContext {
        session_id,
        session,
    });
    next.run(request).await
}
