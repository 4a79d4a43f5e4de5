//! Control-plane endpoints, gated by admin credentials

use crate::domain::{
    ActivityLog, ActivityLogQuery, AdminAccount, ApiKey, Application, AssignRoleInput,
    CreateAdminAccountInput, CreateApiKeyInput, CreateApplicationInput, CreateRoleInput,
    CreateTenantInput, EmailServerConfig, EmailTemplate, Permission, Role, StringUuid,
    SystemSetting, Tenant, UpdateApplicationInput, UpdateTenantInput, UpsertEmailServerConfigInput,
    UpsertEmailTemplateInput, UpsertOAuthConfigInput, UpsertSystemSettingInput, UserProfile,
};
use crate::error::Result;
use crate::server::AppState;
use crate::service::api_key::CreatedApiKey;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Pagination {
    fn bounds(&self) -> (i64, i64) {
        (
            self.offset.unwrap_or(0).max(0),
            self.limit.unwrap_or(50).clamp(1, 200),
        )
    }
}

// ==================== Tenants ====================

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<CreateTenantInput>,
) -> Result<Json<Tenant>> {
    body.validate()?;
    Ok(Json(state.control.create_tenant(&body).await?))
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Tenant>>> {
    let (offset, limit) = page.bounds();
    Ok(Json(state.control.list_tenants(offset, limit).await?))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<Tenant>> {
    Ok(Json(state.control.get_tenant(id).await?))
}

pub async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Json(body): Json<UpdateTenantInput>,
) -> Result<Json<Tenant>> {
    body.validate()?;
    Ok(Json(state.control.update_tenant(id, &body).await?))
}

pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.control.delete_tenant(id).await?;
    Ok(Json(json!({ "message": "Tenant deleted" })))
}

pub async fn list_tenant_applications(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<Vec<Application>>> {
    Ok(Json(state.control.list_tenant_applications(id).await?))
}

// ==================== Applications ====================

pub async fn create_application(
    State(state): State<AppState>,
    Json(body): Json<CreateApplicationInput>,
) -> Result<Json<Application>> {
    body.validate()?;
    Ok(Json(state.control.create_application(&body).await?))
}

pub async fn list_applications(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Application>>> {
    let (offset, limit) = page.bounds();
    Ok(Json(state.control.list_applications(offset, limit).await?))
}

pub async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<Application>> {
    Ok(Json(state.control.get_application(id).await?))
}

pub async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Json(body): Json<UpdateApplicationInput>,
) -> Result<Json<Application>> {
    body.validate()?;
    Ok(Json(state.control.update_application(id, &body).await?))
}

pub async fn delete_application(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.control.delete_application(id).await?;
    Ok(Json(json!({ "message": "Application deleted" })))
}

// ==================== OAuth provider configs ====================

pub async fn upsert_oauth_config(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Json(body): Json<UpsertOAuthConfigInput>,
) -> Result<Json<serde_json::Value>> {
    body.validate()?;
    let config = state.control.upsert_oauth_config(id, &body).await?;
    Ok(Json(json!({
        "id": config.id,
        "provider": config.provider,
        "is_enabled": config.is_enabled,
    })))
}

pub async fn list_oauth_configs(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    let configs = state.control.list_oauth_configs(id).await?;
    let summaries: Vec<_> = configs
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "provider": c.provider,
                "client_id": c.client_id,
                "redirect_url": c.redirect_url,
                "is_enabled": c.is_enabled,
            })
        })
        .collect();
    Ok(Json(json!({ "providers": summaries })))
}

pub async fn delete_oauth_config(
    State(state): State<AppState>,
    Path((id, provider)): Path<(StringUuid, String)>,
) -> Result<Json<serde_json::Value>> {
    state.control.delete_oauth_config(id, &provider).await?;
    Ok(Json(json!({ "message": "Provider config deleted" })))
}

// ==================== Users ====================

pub async fn list_app_users(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Query(page): Query<Pagination>,
) -> Result<Json<serde_json::Value>> {
    let (offset, limit) = page.bounds();
    let users = state.control.list_users(id, offset, limit).await?;
    let total = state.control.count_users(id).await?;
    let profiles: Vec<UserProfile> = users.into_iter().map(Into::into).collect();
    Ok(Json(json!({ "total": total, "users": profiles })))
}

pub async fn get_app_user(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(StringUuid, StringUuid)>,
) -> Result<Json<UserProfile>> {
    Ok(Json(state.control.get_user(id, user_id).await?.into()))
}

#[derive(Debug, Deserialize)]
pub struct UserStatusRequest {
    pub is_active: bool,
}

pub async fn set_user_status(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(StringUuid, StringUuid)>,
    Json(body): Json<UserStatusRequest>,
) -> Result<Json<serde_json::Value>> {
    state
        .control
        .set_user_active(id, user_id, body.is_active)
        .await?;
    if !body.is_active {
        // A deactivated account keeps no live credentials
        state.identity.revoke_all_user_tokens(id, user_id).await?;
    }
    Ok(Json(json!({ "message": "User status updated" })))
}

pub async fn delete_app_user(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(StringUuid, StringUuid)>,
) -> Result<Json<serde_json::Value>> {
    state.identity.revoke_all_user_tokens(id, user_id).await?;
    state.activity.delete_user_logs(user_id).await?;
    state.control.delete_user(id, user_id).await?;
    Ok(Json(json!({ "message": "User deleted" })))
}

// ==================== RBAC ====================

pub async fn create_role(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Json(body): Json<CreateRoleInput>,
) -> Result<Json<Role>> {
    body.validate()?;
    Ok(Json(state.rbac.create_role(id, &body).await?))
}

pub async fn list_roles(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<Vec<Role>>> {
    Ok(Json(state.rbac.list_roles(id).await?))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.rbac.delete_role(id).await?;
    Ok(Json(json!({ "message": "Role deleted" })))
}

pub async fn assign_role(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Json(body): Json<AssignRoleInput>,
) -> Result<Json<serde_json::Value>> {
    state
        .rbac
        .assign_role(id, body.user_id, body.role_id, None)
        .await?;
    Ok(Json(json!({ "message": "Role assigned" })))
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
    Json(body): Json<AssignRoleInput>,
) -> Result<Json<serde_json::Value>> {
    state
        .rbac
        .remove_role(id, body.user_id, body.role_id)
        .await?;
    Ok(Json(json!({ "message": "Role removed" })))
}

pub async fn list_permissions(State(state): State<AppState>) -> Result<Json<Vec<Permission>>> {
    Ok(Json(state.rbac.list_permissions().await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 64))]
    pub resource: String,
    #[validate(length(min = 1, max = 64))]
    pub action: String,
}

pub async fn create_permission(
    State(state): State<AppState>,
    Json(body): Json<CreatePermissionRequest>,
) -> Result<Json<Permission>> {
    body.validate()?;
    Ok(Json(
        state.rbac.create_permission(&body.resource, &body.action).await?,
    ))
}

pub async fn list_role_permissions(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<Vec<Permission>>> {
    Ok(Json(state.rbac.list_role_permissions(id).await?))
}

pub async fn attach_permission(
    State(state): State<AppState>,
    Path((id, permission_id)): Path<(StringUuid, StringUuid)>,
) -> Result<Json<serde_json::Value>> {
    state.rbac.attach_permission(id, permission_id).await?;
    Ok(Json(json!({ "message": "Permission attached" })))
}

pub async fn detach_permission(
    State(state): State<AppState>,
    Path((id, permission_id)): Path<(StringUuid, StringUuid)>,
) -> Result<Json<serde_json::Value>> {
    state.rbac.detach_permission(id, permission_id).await?;
    Ok(Json(json!({ "message": "Permission detached" })))
}

// ==================== API keys ====================

pub async fn create_api_key(
    State(state): State<AppState>,
    Json(body): Json<CreateApiKeyInput>,
) -> Result<Json<CreatedApiKey>> {
    body.validate()?;
    Ok(Json(state.api_keys.create(&body).await?))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<ApiKey>>> {
    let (offset, limit) = page.bounds();
    Ok(Json(state.api_keys.list(offset, limit).await?))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.api_keys.revoke(id).await?;
    Ok(Json(json!({ "message": "API key revoked" })))
}

pub async fn list_app_api_keys(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<Vec<ApiKey>>> {
    Ok(Json(state.api_keys.list_by_app(id).await?))
}

// ==================== Activity logs ====================

pub async fn list_activity_logs(
    State(state): State<AppState>,
    Query(query): Query<ActivityLogQuery>,
) -> Result<Json<serde_json::Value>> {
    let logs: Vec<ActivityLog> = state.activity.find(&query).await?;
    let total = state.activity.count(&query).await?;
    Ok(Json(json!({ "total": total, "logs": logs })))
}

/// Manual sweep trigger for ops tooling
pub async fn sweep_activity_logs(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state.activity.sweep_once().await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GDPR: remove every log row for a user
pub async fn delete_user_logs(
    State(state): State<AppState>,
    Path(user_id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state.activity.delete_user_logs(user_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// ==================== Email configuration ====================

pub async fn upsert_email_template(
    State(state): State<AppState>,
    Json(body): Json<UpsertEmailTemplateInput>,
) -> Result<Json<EmailTemplate>> {
    body.validate()?;
    Ok(Json(state.email_repo.upsert_template(&body).await?))
}

#[derive(Debug, Deserialize)]
pub struct TemplateListQuery {
    #[serde(default)]
    pub app_id: Option<StringUuid>,
}

pub async fn list_email_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateListQuery>,
) -> Result<Json<Vec<EmailTemplate>>> {
    Ok(Json(state.email_repo.list_templates(query.app_id).await?))
}

pub async fn delete_email_template(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.email_repo.delete_template(id).await?;
    Ok(Json(json!({ "message": "Template deleted" })))
}

pub async fn upsert_email_server(
    State(state): State<AppState>,
    Json(body): Json<UpsertEmailServerConfigInput>,
) -> Result<Json<EmailServerConfig>> {
    body.validate()?;
    Ok(Json(state.email_repo.upsert_server_config(&body).await?))
}

pub async fn list_email_servers(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmailServerConfig>>> {
    Ok(Json(state.email_repo.list_server_configs().await?))
}

pub async fn delete_email_server(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.email_repo.delete_server_config(id).await?;
    Ok(Json(json!({ "message": "Server config deleted" })))
}

// ==================== System settings ====================

pub async fn list_settings(State(state): State<AppState>) -> Result<Json<Vec<SystemSetting>>> {
    Ok(Json(state.settings.list().await?))
}

pub async fn upsert_setting(
    State(state): State<AppState>,
    Json(body): Json<UpsertSystemSettingInput>,
) -> Result<Json<SystemSetting>> {
    Ok(Json(state.settings.upsert(&body).await?))
}

pub async fn delete_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.settings.delete(&key).await?;
    Ok(Json(json!({ "message": "Setting deleted" })))
}

/// Resolved value: environment variable > stored row > empty default
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let value = state.settings.get_or(&key, "").await?;
    Ok(Json(json!({ "key": key, "value": value })))
}

// ==================== Admin accounts ====================

pub async fn create_admin_account(
    State(state): State<AppState>,
    Json(body): Json<CreateAdminAccountInput>,
) -> Result<Json<AdminAccount>> {
    body.validate()?;
    Ok(Json(state.admin_sessions.create_account(&body).await?))
}

pub async fn list_admin_accounts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminAccount>>> {
    Ok(Json(state.admin_sessions.list_accounts().await?))
}

pub async fn delete_admin_account(
    State(state): State<AppState>,
    Path(id): Path<StringUuid>,
) -> Result<Json<serde_json::Value>> {
    state.admin_sessions.delete_account(id).await?;
    Ok(Json(json!({ "message": "Admin account deleted" })))
}
