//! DB-backed runtime settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A runtime setting row. Resolution order at read time:
/// environment variable > system_settings row > hardcoded default.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemSetting {
    pub setting_key: String,
    pub setting_value: String,
    pub category: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertSystemSettingInput {
    pub setting_key: String,
    pub setting_value: String,
    pub category: Option<String>,
}
