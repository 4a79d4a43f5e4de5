//! HTTP handlers
//!
//! Handlers are thin translations between DTOs and services; the error
//! envelope is produced exclusively by `AppError::into_response`.

pub mod admin;
pub mod app;
pub mod auth;
pub mod gui;
pub mod health;
pub mod profile;
pub mod social;
pub mod two_factor;
pub mod users;

use crate::domain::StringUuid;
use crate::middleware::client_ip::{extract_ip, extract_user_agent};
use crate::service::activity::EventMeta;
use axum::http::HeaderMap;

/// Assemble the activity metadata for a request
pub(crate) fn event_meta(app_id: StringUuid, headers: &HeaderMap) -> EventMeta {
    EventMeta {
        app_id,
        user_id: None,
        ip: Some(extract_ip(headers)),
        user_agent: Some(extract_user_agent(headers)),
        details: None,
    }
}
