//! OAuth provider config repository

use super::map_unique_violation;
use crate::domain::{OAuthProviderConfig, StringUuid, UpsertOAuthConfigInput};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthConfigRepository: Send + Sync {
    /// Insert or update the config for `(app_id, provider)`
    async fn upsert(
        &self,
        app_id: StringUuid,
        input: &UpsertOAuthConfigInput,
    ) -> Result<OAuthProviderConfig>;
    async fn find(&self, app_id: StringUuid, provider: &str)
        -> Result<Option<OAuthProviderConfig>>;
    async fn list_by_app(&self, app_id: StringUuid) -> Result<Vec<OAuthProviderConfig>>;
    async fn delete(&self, app_id: StringUuid, provider: &str) -> Result<()>;
}

pub struct OAuthConfigRepositoryImpl {
    pool: MySqlPool,
}

impl OAuthConfigRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, app_id, provider, client_id, client_secret, redirect_url, \
                       is_enabled, created_at, updated_at";

#[async_trait]
impl OAuthConfigRepository for OAuthConfigRepositoryImpl {
    async fn upsert(
        &self,
        app_id: StringUuid,
        input: &UpsertOAuthConfigInput,
    ) -> Result<OAuthProviderConfig> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO oauth_provider_configs
                (id, app_id, provider, client_id, client_secret, redirect_url, is_enabled,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            ON DUPLICATE KEY UPDATE
                client_id = VALUES(client_id),
                client_secret = VALUES(client_secret),
                redirect_url = VALUES(redirect_url),
                is_enabled = VALUES(is_enabled),
                updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(app_id)
        .bind(&input.provider)
        .bind(&input.client_id)
        .bind(&input.client_secret)
        .bind(&input.redirect_url)
        .bind(input.is_enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Provider config already exists"))?;

        self.find(app_id, &input.provider)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to upsert provider config")))
    }

    async fn find(
        &self,
        app_id: StringUuid,
        provider: &str,
    ) -> Result<Option<OAuthProviderConfig>> {
        let config = sqlx::query_as::<_, OAuthProviderConfig>(&format!(
            "SELECT {} FROM oauth_provider_configs WHERE app_id = ? AND provider = ?",
            COLUMNS
        ))
        .bind(app_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    async fn list_by_app(&self, app_id: StringUuid) -> Result<Vec<OAuthProviderConfig>> {
        let configs = sqlx::query_as::<_, OAuthProviderConfig>(&format!(
            "SELECT {} FROM oauth_provider_configs WHERE app_id = ? ORDER BY provider",
            COLUMNS
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }

    async fn delete(&self, app_id: StringUuid, provider: &str) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM oauth_provider_configs WHERE app_id = ? AND provider = ?")
                .bind(app_id)
                .bind(provider)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Provider config {} not found",
                provider
            )));
        }
        Ok(())
    }
}
