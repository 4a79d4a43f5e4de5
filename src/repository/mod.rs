//! Persistence layer: one repository per aggregate
//!
//! Each repository is a trait (mockable in tests) with a MySQL
//! implementation over a shared `MySqlPool`. Unique-constraint violations
//! surface as `Conflict`; missing rows as `Ok(None)` from `find_*` with the
//! `NotFound` decision made by services.

pub mod activity_log;
pub mod admin;
pub mod api_key;
pub mod application;
pub mod email;
pub mod federated;
pub mod oauth_config;
pub mod rbac;
pub mod system_settings;
pub mod tenant;
pub mod user;

pub use activity_log::{ActivityLogRepository, ActivityLogRepositoryImpl};
pub use admin::{AdminAccountRepository, AdminAccountRepositoryImpl};
pub use api_key::{ApiKeyRepository, ApiKeyRepositoryImpl};
pub use application::{ApplicationRepository, ApplicationRepositoryImpl};
pub use email::{EmailRepository, EmailRepositoryImpl};
pub use federated::{FederatedIdentityRepository, FederatedIdentityRepositoryImpl};
pub use oauth_config::{OAuthConfigRepository, OAuthConfigRepositoryImpl};
pub use rbac::{RbacRepository, RbacRepositoryImpl};
pub use system_settings::{SystemSettingsRepository, SystemSettingsRepositoryImpl};
pub use tenant::{TenantRepository, TenantRepositoryImpl};
pub use user::{UserRepository, UserRepositoryImpl};

use crate::error::AppError;

/// MySQL duplicate-key errno
const ER_DUP_ENTRY: u16 = 1062;

/// Map an insert/update error, turning duplicate-key violations into
/// `Conflict` with a caller-supplied message.
pub(crate) fn map_unique_violation(e: sqlx::Error, conflict_msg: &str) -> AppError {
    if let sqlx::Error::Database(ref db) = e {
        if let Some(mysql_err) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
            if mysql_err.number() == ER_DUP_ENTRY {
                return AppError::Conflict(conflict_msg.to_string());
            }
        }
    }
    AppError::Database(e)
}
