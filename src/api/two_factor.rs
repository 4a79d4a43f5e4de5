//! Two-factor authentication endpoints

use crate::domain::TwoFaMethod;
use crate::error::Result;
use crate::middleware::auth::CurrentUser;
use crate::middleware::tenant::AppContext;
use crate::server::AppState;
use crate::service::identity::TokenPair;
use crate::service::two_factor::EnrollmentStart;
use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use super::event_meta;

#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    pub method: TwoFaMethod,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(min = 6, max = 8))]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub password: Option<String>,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoFaLoginRequest {
    pub temp_token: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub recovery_code: Option<String>,
}

/// Begin enrollment for the authenticated user
pub async fn enable(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<EnableRequest>,
) -> Result<Json<EnrollmentStart>> {
    let app = state.control.get_application(user.app_id).await?;
    let start = state
        .two_factor
        .start_enrollment(&app, user.user_id, body.method)
        .await?;
    Ok(Json(start))
}

/// Complete enrollment; the response carries the one-time-visible
/// recovery codes
pub async fn verify(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    let mut meta = event_meta(user.app_id, &headers);
    meta.user_id = Some(user.user_id);

    let codes = state
        .two_factor
        .verify_enrollment(user.app_id, user.user_id, &body.code, meta)
        .await?;
    Ok(Json(json!({
        "message": "Two-factor authentication enabled",
        "recovery_codes": codes,
    })))
}

pub async fn disable(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(body): Json<DisableRequest>,
) -> Result<Json<serde_json::Value>> {
    let mut meta = event_meta(user.app_id, &headers);
    meta.user_id = Some(user.user_id);

    state
        .two_factor
        .disable(
            user.app_id,
            user.user_id,
            body.password.as_deref(),
            &body.code,
            meta,
        )
        .await?;
    Ok(Json(json!({ "message": "Two-factor authentication disabled" })))
}

/// Second step of a 2FA login
pub async fn login(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    headers: HeaderMap,
    Json(body): Json<TwoFaLoginRequest>,
) -> Result<Json<TokenPair>> {
    let pair = state
        .identity
        .complete_two_fa_login(
            app.0,
            &body.temp_token,
            body.code.as_deref(),
            body.recovery_code.as_deref(),
            event_meta(app.0, &headers),
        )
        .await?;
    Ok(Json(pair))
}

pub async fn recovery_codes(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let mut meta = event_meta(user.app_id, &headers);
    meta.user_id = Some(user.user_id);

    let codes = state
        .two_factor
        .generate_recovery_codes(user.app_id, user.user_id, meta)
        .await?;
    Ok(Json(json!({ "recovery_codes": codes })))
}
