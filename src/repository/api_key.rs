//! API key repository
//!
//! Keys are create-then-revoke; nothing else mutates them. `last_used_at`
//! is updated out-of-band by a detached task.

use super::map_unique_violation;
use crate::domain::{ApiKey, StringUuid};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

/// Fields persisted when a key is created (the plaintext never reaches here)
#[derive(Debug, Clone)]
pub struct NewApiKeyRecord {
    pub key_type: String,
    pub name: String,
    pub description: Option<String>,
    pub key_hash: String,
    pub key_prefix: String,
    pub key_suffix: String,
    pub app_id: Option<StringUuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn create(&self, record: &NewApiKeyRecord) -> Result<ApiKey>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<ApiKey>>;
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<ApiKey>>;
    async fn list_by_app(&self, app_id: StringUuid) -> Result<Vec<ApiKey>>;
    async fn revoke(&self, id: StringUuid) -> Result<()>;
    async fn touch_last_used(&self, id: StringUuid) -> Result<()>;
}

pub struct ApiKeyRepositoryImpl {
    pool: MySqlPool,
}

impl ApiKeyRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, key_type, name, description, key_hash, key_prefix, key_suffix, \
                       app_id, expires_at, last_used_at, is_revoked, created_at, updated_at";

#[async_trait]
impl ApiKeyRepository for ApiKeyRepositoryImpl {
    async fn create(&self, record: &NewApiKeyRecord) -> Result<ApiKey> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, key_type, name, description, key_hash, key_prefix, key_suffix,
                 app_id, expires_at, is_revoked, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, false, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&record.key_type)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.key_hash)
        .bind(&record.key_prefix)
        .bind(&record.key_suffix)
        .bind(record.app_id)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "API key collision, retry the operation"))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create API key")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE key_hash = ?",
            COLUMNS
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn list_by_app(&self, app_id: StringUuid) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE app_id = ? ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn revoke(&self, id: StringUuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE api_keys SET is_revoked = true, updated_at = NOW() WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("API key {} not found", id)));
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: StringUuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
