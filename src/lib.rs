//! Authgate - Multi-tenant authentication and authorization service
//!
//! This crate provides the core functionality for the Authgate identity
//! service: credential and token lifecycle, the multi-tenant request
//! pipeline, rate limiting, and the activity log engine.

pub mod api;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod email;
pub mod error;
pub mod jwt;
pub mod kv;
pub mod middleware;
pub mod migration;
pub mod repository;
pub mod server;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
