//! Profile endpoints for the authenticated user

use crate::domain::{UpdateProfileInput, UserProfile};
use crate::error::Result;
use crate::middleware::auth::CurrentUser;
use crate::server::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use super::event_meta;

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeEmailRequest {
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub confirm_deletion: bool,
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
) -> Result<Json<UserProfile>> {
    let profile = state
        .identity
        .get_profile(user.app_id, user.user_id, event_meta(user.app_id, &headers))
        .await?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<UserProfile>> {
    body.validate()?;
    let profile = state
        .identity
        .update_profile(
            user.app_id,
            user.user_id,
            &body,
            event_meta(user.app_id, &headers),
        )
        .await?;
    Ok(Json(profile))
}

pub async fn change_email(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(body): Json<ChangeEmailRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    state
        .identity
        .change_email(
            user.app_id,
            user.user_id,
            &body.email,
            body.password.as_deref(),
            event_meta(user.app_id, &headers),
        )
        .await?;
    Ok(Json(json!({
        "message": "Email updated, please verify your new address"
    })))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    state
        .identity
        .change_password(
            user.app_id,
            user.user_id,
            &body.current_password,
            &body.new_password,
            event_meta(user.app_id, &headers),
        )
        .await?;
    Ok(Json(json!({ "message": "Password changed" })))
}

/// Linked provider accounts
pub async fn list_identities(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>> {
    let identities = state.federated.list_identities(user.user_id).await?;
    let linked: Vec<_> = identities
        .into_iter()
        .map(|i| {
            json!({
                "provider": i.provider,
                "linked_at": i.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "identities": linked })))
}

pub async fn delete_account(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(body): Json<DeleteAccountRequest>,
) -> Result<Json<serde_json::Value>> {
    state
        .identity
        .delete_account(
            user.app_id,
            user.user_id,
            body.password.as_deref(),
            body.confirm_deletion,
            event_meta(user.app_id, &headers),
        )
        .await?;
    Ok(Json(json!({ "message": "Account deleted" })))
}
