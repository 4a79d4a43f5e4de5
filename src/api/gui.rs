//! Admin GUI session endpoints
//!
//! JSON endpoints behind the session-cookie pipeline. The login route runs
//! the GUI rate limiter in context mode so the front-end can render the
//! error inline.

use crate::error::{AppError, Result};
use crate::middleware::rate_limit::RateLimitExceeded;
use crate::middleware::session::{AdminSessionContext, SESSION_COOKIE};
use crate::server::AppState;
use axum::{extract::State, Extension, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct GuiLoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    limited: Option<Extension<RateLimitExceeded>>,
    Json(body): Json<GuiLoginRequest>,
) -> Result<(CookieJar, Json<serde_json::Value>)> {
    if let Some(Extension(RateLimitExceeded(message))) = limited {
        return Err(AppError::TooManyRequests(message.to_string()));
    }
    body.validate()?;

    let (session_id, session) = state
        .admin_sessions
        .login(&body.username, &body.password)
        .await?;

    let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_secure(state.config.admin.secure_cookies);

    Ok((
        jar.add(cookie),
        Json(json!({ "message": "Logged in", "username": session.username })),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminSessionContext>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>)> {
    state.admin_sessions.logout(&ctx.session_id).await?;
    Ok((
        jar.remove(Cookie::from(SESSION_COOKIE)),
        Json(json!({ "message": "Logged out" })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct GuiChangePasswordRequest {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminSessionContext>,
    Json(body): Json<GuiChangePasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    state
        .admin_sessions
        .change_password(
            ctx.session.admin_id,
            &body.current_password,
            &body.new_password,
        )
        .await?;
    Ok(Json(json!({ "message": "Password changed" })))
}

pub async fn me(Extension(ctx): Extension<AdminSessionContext>) -> Json<serde_json::Value> {
    Json(json!({
        "admin_id": ctx.session.admin_id,
        "username": ctx.session.username,
        "since": ctx.session.created_at,
    }))
}

/// The CSRF middleware attaches the token to this response's headers
pub async fn csrf() -> Json<serde_json::Value> {
    Json(json!({ "message": "CSRF token issued in X-CSRF-Token header" }))
}
