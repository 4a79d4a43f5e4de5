//! Request pipeline guards
//!
//! Each guard either enriches the request context and passes it forward,
//! rejects with a typed HTTP error, or redirects. Route groups compose the
//! guards they need; within one request the chain is strictly sequential.

pub mod api_key;
pub mod auth;
pub mod authorize;
pub mod client_ip;
pub mod csrf;
pub mod path_guard;
pub mod rate_limit;
pub mod security_headers;
pub mod session;
pub mod tenant;

pub use api_key::{AdminPrincipal, ApiKeyAuthState, AppKeyPrincipal};
pub use auth::{AuthState, CurrentUser};
pub use authorize::{PermissionGuard, RoleGuard};
pub use csrf::CsrfState;
pub use rate_limit::{LimitMode, RateLimitLayerState, RateLimitRule, RateLimiter};
pub use session::{AdminSessionContext, SessionAuthState};
pub use tenant::AppContext;
