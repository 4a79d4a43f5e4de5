//! Social login endpoints
//!
//! The provider handshake itself happens behind the `ProviderGateway`
//! boundary; these handlers mint and validate the state parameter and feed
//! normalized profiles into the external identity adapter.

use crate::crypto::generate_token;
use crate::domain::OAuthState;
use crate::error::{AppError, Result};
use crate::middleware::tenant::AppContext;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use super::auth::LoginResponse;
use super::event_meta;

#[derive(Debug, Deserialize)]
pub struct SocialLoginQuery {
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// Start a social login: validate the redirect target, mint the state
/// parameter, and bounce to the provider.
pub async fn login(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    Path(provider): Path<String>,
    Query(query): Query<SocialLoginQuery>,
) -> Result<Redirect> {
    let oauth_state = OAuthState {
        app_id: app.0,
        redirect_uri: query.redirect_uri.clone(),
        nonce: generate_token(),
        timestamp: Utc::now().timestamp(),
    };
    if !oauth_state.redirect_allowed(&state.config.oauth.allowed_redirect_domains) {
        return Err(AppError::BadRequest(
            "redirect_uri is not allow-listed".to_string(),
        ));
    }

    let config = state
        .control
        .oauth_config_with_secret(app.0, &provider)
        .await?;
    let url = state
        .provider_gateway
        .authorize_url(&config, &oauth_state.encode())?;

    Ok(Redirect::to(&url))
}

/// Provider callback: validate the state, exchange the code through the
/// gateway, and reconcile the profile.
pub async fn callback(
    State(state): State<AppState>,
    Extension(app): Extension<AppContext>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<LoginResponse>> {
    let oauth_state = OAuthState::decode(&query.state)
        .ok_or_else(|| AppError::BadRequest("Invalid state parameter".to_string()))?;

    if !oauth_state.is_fresh(Utc::now().timestamp(), state.config.oauth.state_max_age_secs) {
        return Err(AppError::BadRequest("State parameter has expired".to_string()));
    }
    if !oauth_state.redirect_allowed(&state.config.oauth.allowed_redirect_domains) {
        return Err(AppError::BadRequest(
            "redirect_uri is not allow-listed".to_string(),
        ));
    }
    if oauth_state.app_id != app.0 {
        return Err(AppError::BadRequest(
            "State parameter does not match the application".to_string(),
        ));
    }

    let config = state
        .control
        .oauth_config_with_secret(app.0, &provider)
        .await?;
    let (profile, provider_tokens) = state
        .provider_gateway
        .exchange_code(&config, &query.code)
        .await?;

    if profile.provider.as_str() != provider {
        return Err(AppError::BadRequest(
            "Profile provider does not match the callback".to_string(),
        ));
    }

    let outcome = state
        .federated
        .login(app.0, &profile, provider_tokens, event_meta(app.0, &headers))
        .await?;
    Ok(Json(outcome.into()))
}
