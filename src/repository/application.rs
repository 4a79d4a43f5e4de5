//! Application repository

use super::map_unique_violation;
use crate::domain::{
    Application, CreateApplicationInput, StringUuid, TwoFaMethod, UpdateApplicationInput,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create(&self, input: &CreateApplicationInput) -> Result<Application>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Application>>;
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Application>>;
    async fn list_by_tenant(&self, tenant_id: StringUuid) -> Result<Vec<Application>>;
    async fn count(&self) -> Result<i64>;
    async fn update(&self, id: StringUuid, input: &UpdateApplicationInput) -> Result<Application>;
    async fn delete(&self, id: StringUuid) -> Result<()>;
}

pub struct ApplicationRepositoryImpl {
    pool: MySqlPool,
}

impl ApplicationRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, tenant_id, name, description, two_fa_enabled, two_fa_required, \
                       two_fa_methods, two_fa_issuer_name, created_at, updated_at";

fn methods_to_string(methods: &[TwoFaMethod]) -> String {
    methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ApplicationRepository for ApplicationRepositoryImpl {
    async fn create(&self, input: &CreateApplicationInput) -> Result<Application> {
        if !input.check_two_fa_invariant() {
            return Err(AppError::BadRequest(
                "two_fa_required cannot be set without two_fa_enabled".to_string(),
            ));
        }

        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO applications
                (id, tenant_id, name, description, two_fa_enabled, two_fa_required,
                 two_fa_methods, two_fa_issuer_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.two_fa_enabled)
        .bind(input.two_fa_required)
        .bind(methods_to_string(&input.two_fa_methods))
        .bind(&input.two_fa_issuer_name)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "An application with this name already exists"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create application")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Application>> {
        let app = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Application>> {
        let apps = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(apps)
    }

    async fn list_by_tenant(&self, tenant_id: StringUuid) -> Result<Vec<Application>> {
        let apps = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE tenant_id = ? ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(apps)
    }

    async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM applications")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn update(&self, id: StringUuid, input: &UpdateApplicationInput) -> Result<Application> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;

        let name = input.name.as_deref().unwrap_or(&existing.name);
        let description = input.description.as_ref().or(existing.description.as_ref());
        let two_fa_enabled = input.two_fa_enabled.unwrap_or(existing.two_fa_enabled);
        let two_fa_required = input.two_fa_required.unwrap_or(existing.two_fa_required);
        let two_fa_methods = input
            .two_fa_methods
            .as_ref()
            .map(|m| methods_to_string(m))
            .unwrap_or_else(|| existing.two_fa_methods.clone());
        let two_fa_issuer_name = input
            .two_fa_issuer_name
            .as_ref()
            .or(existing.two_fa_issuer_name.as_ref());

        if two_fa_required && !two_fa_enabled {
            return Err(AppError::BadRequest(
                "two_fa_required cannot be set without two_fa_enabled".to_string(),
            ));
        }

        sqlx::query(
            r#"
            UPDATE applications
            SET name = ?, description = ?, two_fa_enabled = ?, two_fa_required = ?,
                two_fa_methods = ?, two_fa_issuer_name = ?, updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(two_fa_enabled)
        .bind(two_fa_required)
        .bind(&two_fa_methods)
        .bind(two_fa_issuer_name)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "An application with this name already exists"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update application")))
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Application {} not found", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_to_string() {
        assert_eq!(
            methods_to_string(&[TwoFaMethod::Totp, TwoFaMethod::Email]),
            "totp,email"
        );
        assert_eq!(methods_to_string(&[]), "");
    }
}
