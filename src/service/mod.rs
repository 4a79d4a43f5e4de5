//! Business logic services

pub mod activity;
pub mod admin_session;
pub mod api_key;
pub mod control;
pub mod email;
pub mod federated;
pub mod identity;
pub mod rbac;
pub mod system_settings;
pub mod two_factor;

pub use activity::{ActivityLogEngine, EventMeta};
pub use admin_session::AdminSessionService;
pub use api_key::ApiKeyService;
pub use control::ControlPlaneService;
pub use email::{EmailOrchestrator, EmailSender};
pub use federated::FederatedService;
pub use identity::IdentityService;
pub use rbac::RbacService;
pub use system_settings::SystemSettingsService;
pub use two_factor::TwoFactorService;
