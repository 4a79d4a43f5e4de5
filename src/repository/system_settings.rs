//! System settings repository

use crate::domain::SystemSetting;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemSettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SystemSetting>>;
    async fn upsert(&self, key: &str, value: &str, category: &str) -> Result<SystemSetting>;
    async fn list(&self) -> Result<Vec<SystemSetting>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

pub struct SystemSettingsRepositoryImpl {
    pool: MySqlPool,
}

impl SystemSettingsRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "setting_key, setting_value, category, updated_at";

#[async_trait]
impl SystemSettingsRepository for SystemSettingsRepositoryImpl {
    async fn get(&self, key: &str) -> Result<Option<SystemSetting>> {
        let setting = sqlx::query_as::<_, SystemSetting>(&format!(
            "SELECT {} FROM system_settings WHERE setting_key = ?",
            COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(setting)
    }

    async fn upsert(&self, key: &str, value: &str, category: &str) -> Result<SystemSetting> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (setting_key, setting_value, category, updated_at)
            VALUES (?, ?, ?, NOW())
            ON DUPLICATE KEY UPDATE
                setting_value = VALUES(setting_value),
                category = VALUES(category),
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(category)
        .execute(&self.pool)
        .await?;

        self.get(key)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to upsert setting")))
    }

    async fn list(&self) -> Result<Vec<SystemSetting>> {
        let settings = sqlx::query_as::<_, SystemSetting>(&format!(
            "SELECT {} FROM system_settings ORDER BY category, setting_key",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(settings)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM system_settings WHERE setting_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Setting {} not found", key)));
        }
        Ok(())
    }
}
