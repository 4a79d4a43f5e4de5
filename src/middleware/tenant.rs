//! Tenant resolution guard
//!
//! API routes carry the application ID in the `X-App-ID` header. OAuth
//! callbacks instead carry it inside the encoded `state` query parameter.
//! The resolved ID is stored in the request context for downstream guards.

use crate::domain::{OAuthState, StringUuid};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const APP_ID_HEADER: &str = "x-app-id";

/// The tenant-resolved application ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppContext(pub StringUuid);

pub async fn resolve_application(mut request: Request<Body>, next: Next) -> Response {
    let header_value = request
        .headers()
        .get(APP_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let app_id = match header_value {
        Some(raw) => match StringUuid::parse_str(&raw) {
            Ok(id) => id,
            Err(_) => {
                return bad_request("Invalid X-App-ID header");
            }
        },
        None => {
            // OAuth callbacks resolve the tenant from the state parameter
            match app_id_from_state(request.uri().query()) {
                Some(id) => id,
                None => {
                    return bad_request("X-App-ID header is required");
                }
            }
        }
    };

    request.extensions_mut().insert(AppContext(app_id));
    next.run(request).await
}

fn app_id_from_state(query: Option<&str>) -> Option<StringUuid> {
    let query = query?;
    let state = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("state="))?;
    OAuthState::decode(state).map(|s| s.app_id)
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
