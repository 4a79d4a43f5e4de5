//! Authentication endpoints

use crate::domain::TwoFaMethod;
use crate::error::Result;
use crate::middleware::auth::CurrentUser;
use crate::middleware::tenant::AppContext;
use crate::server::AppState;
use crate::service::identity::{LoginOutcome, TokenPair};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use super::event_meta;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

/// Login answer: either a token pair or a 2FA challenge
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: Option<TokenPair>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_two_fa: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_two_fa_setup: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_fa_method: Option<TwoFaMethod>,
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::Success {
                tokens,
                requires_two_fa_setup,
            } => Self {
                tokens: Some(tokens),
                requires_two_fa: false,
                requires_two_fa_setup,
                temp_token: None,
                two_fa_method: None,
            },
            LoginOutcome::TwoFaRequired { temp_token, method } => Self {
                tokens: None,
                requires_two_fa: true,
                requires_two_fa_setup: false,
                temp_token: Some(temp_token),
                two_fa_method: Some(method),
            },
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    let profile = state
        .identity
        .register(app.0, &body.email, &body.password, event_meta(app.0, &headers))
        .await?;
    Ok(Json(json!({
        "message": "Registration successful, please verify your email",
        "user": profile,
    })))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    body.validate()?;
    let outcome = state
        .identity
        .login(app.0, &body.email, &body.password, event_meta(app.0, &headers))
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>> {
    let pair = state
        .identity
        .refresh(&body.refresh_token, event_meta(app.0, &headers))
        .await?;
    Ok(Json(pair))
}

pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Json<serde_json::Value> {
    let refresh_token = body.and_then(|Json(b)| b.refresh_token);
    let remaining = (user.token_exp - chrono::Utc::now().timestamp()).max(0) as u64;

    state
        .identity
        .logout(
            user.app_id,
            user.user_id,
            &user.token_digest,
            remaining,
            refresh_token.as_deref(),
            event_meta(user.app_id, &headers),
        )
        .await;

    Json(json!({ "message": "Logged out" }))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    headers: HeaderMap,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<serde_json::Value>> {
    state
        .identity
        .verify_email(app.0, &query.token, event_meta(app.0, &headers))
        .await?;
    Ok(Json(json!({ "message": "Email verified" })))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    state.identity.forgot_password(app.0, &body.email).await?;
    // Deliberately identical for known and unknown addresses
    Ok(Json(json!({
        "message": "If the email exists, a reset link has been sent"
    })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    headers: HeaderMap,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    state
        .identity
        .reset_password(app.0, &body.token, &body.new_password, event_meta(app.0, &headers))
        .await?;
    Ok(Json(json!({ "message": "Password has been reset" })))
}
