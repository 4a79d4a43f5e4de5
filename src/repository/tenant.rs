//! Tenant repository

use super::map_unique_violation;
use crate::domain::{CreateTenantInput, StringUuid, Tenant, UpdateTenantInput};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, input: &CreateTenantInput) -> Result<Tenant>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Tenant>>;
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Tenant>>;
    async fn count(&self) -> Result<i64>;
    async fn update(&self, id: StringUuid, input: &UpdateTenantInput) -> Result<Tenant>;
    async fn delete(&self, id: StringUuid) -> Result<()>;
}

pub struct TenantRepositoryImpl {
    pool: MySqlPool,
}

impl TenantRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, name, created_at, updated_at";

#[async_trait]
impl TenantRepository for TenantRepositoryImpl {
    async fn create(&self, input: &CreateTenantInput) -> Result<Tenant> {
        let id = StringUuid::new_v4();

        sqlx::query("INSERT INTO tenants (id, name, created_at, updated_at) VALUES (?, ?, NOW(), NOW())")
            .bind(id)
            .bind(&input.name)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "A tenant with this name already exists"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create tenant")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }

    async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tenants")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn update(&self, id: StringUuid, input: &UpdateTenantInput) -> Result<Tenant> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tenant {} not found", id)))?;

        let name = input.name.as_deref().unwrap_or(&existing.name);

        sqlx::query("UPDATE tenants SET name = ?, updated_at = NOW() WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "A tenant with this name already exists"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update tenant")))
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Tenant {} not found", id)));
        }
        Ok(())
    }
}
