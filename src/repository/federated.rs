//! Federated identity repository

use super::map_unique_violation;
use crate::domain::{
    CreateFederatedIdentityInput, FederatedIdentity, RefreshFederatedIdentityInput, StringUuid,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FederatedIdentityRepository: Send + Sync {
    async fn create(&self, input: &CreateFederatedIdentityInput) -> Result<FederatedIdentity>;
    async fn find(
        &self,
        app_id: StringUuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<FederatedIdentity>>;
    async fn list_by_user(&self, user_id: StringUuid) -> Result<Vec<FederatedIdentity>>;
    /// Update the stored profile blob and provider tokens on a fresh login
    async fn refresh(
        &self,
        id: StringUuid,
        input: &RefreshFederatedIdentityInput,
    ) -> Result<()>;
    async fn delete_by_user(&self, user_id: StringUuid) -> Result<u64>;
}

pub struct FederatedIdentityRepositoryImpl {
    pool: MySqlPool,
}

impl FederatedIdentityRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, user_id, app_id, provider, provider_user_id, provider_profile, \
                       access_token, refresh_token, expires_at, created_at, updated_at";

#[async_trait]
impl FederatedIdentityRepository for FederatedIdentityRepositoryImpl {
    async fn create(&self, input: &CreateFederatedIdentityInput) -> Result<FederatedIdentity> {
        let id = StringUuid::new_v4();
        let profile = serde_json::to_string(&input.provider_profile)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Profile serialize error: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO federated_identities
                (id, user_id, app_id, provider, provider_user_id, provider_profile,
                 access_token, refresh_token, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(input.app_id)
        .bind(&input.provider)
        .bind(&input.provider_user_id)
        .bind(profile)
        .bind(&input.access_token)
        .bind(&input.refresh_token)
        .bind(input.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "This provider account is already linked"))?;

        let created = sqlx::query_as::<_, FederatedIdentity>(&format!(
            "SELECT {} FROM federated_identities WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        created.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Failed to create federated identity"))
        })
    }

    async fn find(
        &self,
        app_id: StringUuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<FederatedIdentity>> {
        let identity = sqlx::query_as::<_, FederatedIdentity>(&format!(
            "SELECT {} FROM federated_identities \
             WHERE app_id = ? AND provider = ? AND provider_user_id = ?",
            COLUMNS
        ))
        .bind(app_id)
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn list_by_user(&self, user_id: StringUuid) -> Result<Vec<FederatedIdentity>> {
        let identities = sqlx::query_as::<_, FederatedIdentity>(&format!(
            "SELECT {} FROM federated_identities WHERE user_id = ? ORDER BY created_at",
            COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(identities)
    }

    async fn refresh(
        &self,
        id: StringUuid,
        input: &RefreshFederatedIdentityInput,
    ) -> Result<()> {
        let profile = serde_json::to_string(&input.provider_profile)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Profile serialize error: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE federated_identities
            SET provider_profile = ?, access_token = ?, refresh_token = ?, expires_at = ?,
                updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(profile)
        .bind(&input.access_token)
        .bind(&input.refresh_token)
        .bind(input.expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Federated identity {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn delete_by_user(&self, user_id: StringUuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM federated_identities WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
