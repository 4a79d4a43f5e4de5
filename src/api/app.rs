//! Application-scoped machine endpoints (app API key callers)
//!
//! The route-scope guard has already verified that the `{id}` in the URL
//! matches the tenant-resolved application.

use crate::domain::{StringUuid, UserProfile};
use crate::error::Result;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Public configuration of the application (no secrets)
pub async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    let app = state.control.get_application(id).await?;
    Ok(Json(json!({
        "id": app.id,
        "name": app.name,
        "description": app.description,
        "two_fa_enabled": app.two_fa_enabled,
        "two_fa_required": app.two_fa_required,
        "two_fa_methods": app.methods(),
    })))
}

pub async fn list_users(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Query(page): Query<Pagination>,
) -> Result<Json<serde_json::Value>> {
    let offset = page.offset.unwrap_or(0).max(0);
    let limit = page.limit.unwrap_or(50).clamp(1, 200);
    let users = state.control.list_users(id, offset, limit).await?;
    let profiles: Vec<UserProfile> = users.into_iter().map(Into::into).collect();
    Ok(Json(json!({ "users": profiles })))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(StringUuid, StringUuid)>,
) -> Result<Json<UserProfile>> {
    let user = state.control.get_user(id, user_id).await?;
    Ok(Json(user.into()))
}
