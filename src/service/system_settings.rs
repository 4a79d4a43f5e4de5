//! Runtime settings with layered resolution
//!
//! Resolution order: environment variable (setting key uppercased) >
//! `system_settings` row > caller-supplied default.

use crate::domain::{SystemSetting, UpsertSystemSettingInput};
use crate::error::Result;
use crate::repository::SystemSettingsRepository;
use std::sync::Arc;

pub struct SystemSettingsService {
    repo: Arc<dyn SystemSettingsRepository>,
}

impl SystemSettingsService {
    pub fn new(repo: Arc<dyn SystemSettingsRepository>) -> Self {
        Self { repo }
    }

    /// Resolve a setting: env var wins, then the DB row, then the default
    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        if let Ok(value) = std::env::var(key.to_uppercase().replace('.', "_")) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
        if let Some(row) = self.repo.get(key).await? {
            return Ok(row.setting_value);
        }
        Ok(default.to_string())
    }

    pub async fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        let raw = self.get_or(key, if default { "true" } else { "false" }).await?;
        Ok(raw.to_lowercase() == "true")
    }

    pub async fn get_i64_or(&self, key: &str, default: i64) -> Result<i64> {
        let raw = self.get_or(key, &default.to_string()).await?;
        Ok(raw.parse().unwrap_or(default))
    }

    pub async fn upsert(&self, input: &UpsertSystemSettingInput) -> Result<SystemSetting> {
        self.repo
            .upsert(
                &input.setting_key,
                &input.setting_value,
                input.category.as_deref().unwrap_or("general"),
            )
            .await
    }

    pub async fn list(&self) -> Result<Vec<SystemSetting>> {
        self.repo.list().await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.repo.delete(key).await
    }
}
