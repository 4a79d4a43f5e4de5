//! CSRF protection for the admin GUI
//!
//! Safe methods receive the per-session token (created once, stable for the
//! session lifetime) in the `X-CSRF-Token` response header. State-changing
//! methods must present a matching token in the header or a `csrf_token`
//! form field.

use crate::crypto::{constant_time_eq, generate_token};
use crate::kv::KvOperations;
use crate::middleware::session::AdminSessionContext;
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

pub const CSRF_HEADER: &str = "x-csrf-token";
const CSRF_FORM_FIELD: &str = "csrf_token";
const FORM_BODY_LIMIT: usize = 64 * 1024;

#[derive(Clone)]
pub struct CsrfState {
    pub kv: Arc<dyn KvOperations>,
    pub session_ttl_secs: u64,
}

pub async fn csrf_protect(
    State(state): State<CsrfState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(ctx) = request.extensions().get::<AdminSessionContext>().cloned() else {
        // Session guard must run first; without it there is nothing to bind
        // the token to.
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authentication required" })),
        )
            .into_response();
    };

    if is_safe_method(request.method()) {
        let token = match get_or_create_token(&state, &ctx.session_id).await {
            Ok(t) => t,
            Err(e) => return e.into_response(),
        };
        let mut response = next.run(request).await;
        if let Ok(value) = token.parse() {
            response.headers_mut().insert("X-CSRF-Token", value);
        }
        return response;
    }

    let stored = match state.kv.get_csrf_token(&ctx.session_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return invalid_token(),
        Err(e) => return e.into_response(),
    };

    let (request, presented) = match presented_token(request).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), stored.as_bytes()) => {
            next.run(request).await
        }
        _ => invalid_token(),
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

async fn get_or_create_token(state: &CsrfState, session_id: &str) -> crate::Result<String> {
    if let Some(existing) = state.kv.get_csrf_token(session_id).await? {
        return Ok(existing);
    }
    let token = generate_token();
    state
        .kv
        .store_csrf_token(session_id, &token, state.session_ttl_secs)
        .await?;
    Ok(token)
}

/// Read the token from the header, or from an urlencoded form body. Reading
/// the body consumes it, so the request is rebuilt from the buffered bytes.
async fn presented_token(
    request: Request<Body>,
) -> Result<(Request<Body>, Option<String>), Response> {
    if let Some(token) = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    {
        return Ok((request, Some(token)));
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if !is_form {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, FORM_BODY_LIMIT).await.map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Request body too large" })),
        )
            .into_response()
    })?;

    let token = form_field(&bytes, CSRF_FORM_FIELD);
    let request = Request::from_parts(parts, Body::from(bytes));
    Ok((request, token))
}

fn form_field(bytes: &[u8], name: &str) -> Option<String> {
    let body = std::str::from_utf8(bytes).ok()?;
    body.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            Some(v.replace('+', " "))
        } else {
            None
        }
    })
}

fn invalid_token() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "Invalid CSRF token" })),
    )
        .into_response()
}
