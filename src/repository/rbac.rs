//! RBAC repository: roles, permissions, assignments
//!
//! Multi-row invariants (same-app assignment, system-role seeding) run in
//! transactions.

use super::map_unique_violation;
use crate::domain::{
    CreateRoleInput, Permission, Role, StringUuid, UserRolesInApp, SYSTEM_ROLES,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RbacRepository: Send + Sync {
    async fn create_role(&self, app_id: StringUuid, input: &CreateRoleInput) -> Result<Role>;
    async fn find_role_by_id(&self, id: StringUuid) -> Result<Option<Role>>;
    async fn find_role_by_name(&self, app_id: StringUuid, name: &str) -> Result<Option<Role>>;
    async fn list_roles(&self, app_id: StringUuid) -> Result<Vec<Role>>;
    async fn delete_role(&self, id: StringUuid) -> Result<()>;

    /// Seed the per-application system roles (admin, member, viewer).
    /// Idempotent.
    async fn seed_system_roles(&self, app_id: StringUuid) -> Result<()>;

    async fn list_permissions(&self) -> Result<Vec<Permission>>;
    async fn find_permission(&self, resource: &str, action: &str) -> Result<Option<Permission>>;
    async fn create_permission(&self, resource: &str, action: &str) -> Result<Permission>;
    async fn attach_permission(&self, role_id: StringUuid, permission_id: StringUuid)
        -> Result<()>;
    async fn detach_permission(&self, role_id: StringUuid, permission_id: StringUuid)
        -> Result<()>;
    async fn list_role_permissions(&self, role_id: StringUuid) -> Result<Vec<Permission>>;

    /// Assign a role to a user, enforcing that the role, the user, and the
    /// assignment all belong to the same application.
    async fn assign_role(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_id: StringUuid,
        assigned_by: Option<StringUuid>,
    ) -> Result<()>;
    async fn remove_role(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<()>;

    /// Resolve a user's roles and derived permissions in one application
    async fn resolve_user_access(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<UserRolesInApp>;
}

pub struct RbacRepositoryImpl {
    pool: MySqlPool,
}

impl RbacRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const ROLE_COLUMNS: &str = "id, app_id, name, description, is_system, created_at, updated_at";

#[async_trait]
impl RbacRepository for RbacRepositoryImpl {
    async fn create_role(&self, app_id: StringUuid, input: &CreateRoleInput) -> Result<Role> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO roles (id, app_id, name, description, is_system, created_at, updated_at)
            VALUES (?, ?, ?, ?, false, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(app_id)
        .bind(&input.name)
        .bind(&input.description)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "A role with this name already exists"))?;

        self.find_role_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create role")))
    }

    async fn find_role_by_id(&self, id: StringUuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE id = ?",
            ROLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn find_role_by_name(&self, app_id: StringUuid, name: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE app_id = ? AND name = ?",
            ROLE_COLUMNS
        ))
        .bind(app_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn list_roles(&self, app_id: StringUuid) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE app_id = ? ORDER BY name",
            ROLE_COLUMNS
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    async fn delete_role(&self, id: StringUuid) -> Result<()> {
        let role = self
            .find_role_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", id)))?;

        if role.is_system {
            return Err(AppError::BadRequest(
                "System roles cannot be deleted".to_string(),
            ));
        }

        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seed_system_roles(&self, app_id: StringUuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for name in SYSTEM_ROLES {
            sqlx::query(
                r#"
                INSERT IGNORE INTO roles
                    (id, app_id, name, description, is_system, created_at, updated_at)
                VALUES (?, ?, ?, NULL, true, NOW(), NOW())
                "#,
            )
            .bind(StringUuid::new_v4())
            .bind(app_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT id, resource, action FROM permissions ORDER BY resource, action",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }

    async fn find_permission(&self, resource: &str, action: &str) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT id, resource, action FROM permissions WHERE resource = ? AND action = ?",
        )
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;

        Ok(permission)
    }

    async fn create_permission(&self, resource: &str, action: &str) -> Result<Permission> {
        let id = StringUuid::new_v4();

        sqlx::query("INSERT INTO permissions (id, resource, action) VALUES (?, ?, ?)")
            .bind(id)
            .bind(resource)
            .bind(action)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "Permission already exists"))?;

        self.find_permission(resource, action)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create permission")))
    }

    async fn attach_permission(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        sqlx::query("INSERT IGNORE INTO role_permissions (role_id, permission_id) VALUES (?, ?)")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn detach_permission(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_role_permissions(&self, role_id: StringUuid) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.id, p.resource, p.action
            FROM permissions p
            INNER JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = ?
            ORDER BY p.resource, p.action
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }

    async fn assign_role(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_id: StringUuid,
        assigned_by: Option<StringUuid>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Invariant: role and user must belong to the assignment's app
        let role_app: Option<(StringUuid,)> =
            sqlx::query_as("SELECT app_id FROM roles WHERE id = ? FOR UPDATE")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
        let role_app = role_app
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))?
            .0;
        if role_app != app_id {
            return Err(AppError::BadRequest(
                "Role does not belong to this application".to_string(),
            ));
        }

        let user_app: Option<(StringUuid,)> =
            sqlx::query_as("SELECT app_id FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let user_app = user_app
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?
            .0;
        if user_app != app_id {
            return Err(AppError::BadRequest(
                "User does not belong to this application".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT IGNORE INTO user_roles (user_id, role_id, app_id, assigned_at, assigned_by)
            VALUES (?, ?, ?, NOW(), ?)
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(app_id)
        .bind(assigned_by)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM user_roles WHERE app_id = ? AND user_id = ? AND role_id = ?",
        )
        .bind(app_id)
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Role assignment not found".to_string()));
        }
        Ok(())
    }

    async fn resolve_user_access(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<UserRolesInApp> {
        let roles: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name
            FROM roles r
            INNER JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.app_id = ? AND ur.user_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(app_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let permissions: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT DISTINCT p.resource, p.action
            FROM permissions p
            INNER JOIN role_permissions rp ON rp.permission_id = p.id
            INNER JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.app_id = ? AND ur.user_id = ?
            ORDER BY p.resource, p.action
            "#,
        )
        .bind(app_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(UserRolesInApp {
            user_id,
            app_id,
            roles: roles.into_iter().map(|(name,)| name).collect(),
            permissions: permissions
                .into_iter()
                .map(|(resource, action)| format!("{}:{}", resource, action))
                .collect(),
        })
    }
}
