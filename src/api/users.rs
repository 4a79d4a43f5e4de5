//! Application-level user directory for role-bearing user tokens
//!
//! These routes sit behind the bearer-token guard plus the RBAC guards:
//! listing requires the `admin` role, reading a single user requires the
//! `users:read` permission.

use crate::domain::{StringUuid, UserProfile};
use crate::error::Result;
use crate::middleware::auth::CurrentUser;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<UserProfile>>> {
    let offset = page.offset.unwrap_or(0).max(0);
    let limit = page.limit.unwrap_or(50).clamp(1, 200);
    let users = state.control.list_users(user.app_id, offset, limit).await?;
    Ok(Json(users.into_iter().map(Into::into).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<StringUuid>,
) -> Result<Json<UserProfile>> {
    let found = state.control.get_user(user.app_id, user_id).await?;
    Ok(Json(found.into()))
}
