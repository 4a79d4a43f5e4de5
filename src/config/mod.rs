//! Configuration management for Authgate

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Runtime environment: "development" or "production"
    pub environment: String,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// JWT configuration
    pub jwt: JwtConfig,
    /// Admin access configuration
    pub admin: AdminConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Activity log configuration
    pub activity: ActivityConfig,
    /// OAuth / social login configuration
    pub oauth: OAuthConfig,
    /// Email dispatch configuration
    pub email: EmailConfig,
    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Static admin API key compared in constant time before any store lookup
    pub api_key: Option<String>,
    /// Admin GUI session lifetime
    pub session_ttl_secs: u64,
    /// Whether session cookies require the Secure attribute
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Front-end origin allowed to call the API; required in production
    pub frontend_url: Option<String>,
    /// Additional allowed origins (comma-separated env var)
    pub extra_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Activity log engine configuration
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    /// Retention in days per severity tier
    pub retention_critical_days: i64,
    pub retention_important_days: i64,
    pub retention_informational_days: i64,
    /// Sweeper interval in seconds
    pub cleanup_interval_secs: u64,
    /// Rows deleted per sweep batch
    pub cleanup_batch_size: u32,
    /// Whether anomaly detection runs for informational events
    pub anomaly_detection_enabled: bool,
    /// Fingerprint memory window in days
    pub anomaly_session_window_days: i64,
    /// Event names (wire format) that are never recorded
    pub disabled_events: HashSet<String>,
    /// Sampling rate per informational event name, 0.0..=1.0
    pub sampling_rates: HashMap<String, f64>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            retention_critical_days: 365,
            retention_important_days: 180,
            retention_informational_days: 90,
            cleanup_interval_secs: 86_400,
            cleanup_batch_size: 1000,
            anomaly_detection_enabled: true,
            anomaly_session_window_days: 30,
            disabled_events: HashSet::new(),
            sampling_rates: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Domains a social-login redirect_uri may point at
    pub allowed_redirect_domains: Vec<String>,
    /// Maximum age of the OAuth state parameter in seconds
    pub state_max_age_secs: i64,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// When true, mail is logged instead of dispatched over SMTP
    pub dev_mode: bool,
    /// Sender used when a server config does not specify one
    pub default_from: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    pub log_format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let environment =
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            environment,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                acquire_timeout_secs: env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").context("JWT_SECRET is required")?,
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "authgate".to_string()),
                access_token_ttl_secs: env::var("JWT_ACCESS_TOKEN_TTL_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .unwrap_or(900),
                refresh_token_ttl_secs: env::var("JWT_REFRESH_TOKEN_TTL_SECS")
                    .unwrap_or_else(|_| "2592000".to_string())
                    .parse()
                    .unwrap_or(2_592_000),
            },
            admin: AdminConfig {
                api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),
                session_ttl_secs: env::var("ADMIN_SESSION_TTL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600),
                secure_cookies: env::var("ADMIN_SECURE_COOKIES")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(false),
            },
            cors: CorsConfig {
                frontend_url: env::var("FRONTEND_URL").ok().filter(|u| !u.is_empty()),
                extra_origins: env::var("CORS_EXTRA_ORIGINS")
                    .map(|s| {
                        s.split(',')
                            .map(|o| o.trim().to_string())
                            .filter(|o| !o.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            rate_limit: RateLimitConfig {
                enabled: env::var("RATE_LIMIT_ENABLED")
                    .map(|s| s.to_lowercase() != "false")
                    .unwrap_or(true),
            },
            activity: {
                let disabled_events: HashSet<String> = env::var("ACTIVITY_DISABLED_EVENTS")
                    .map(|s| {
                        s.split(',')
                            .map(|e| e.trim().to_uppercase())
                            .filter(|e| !e.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();

                let sampling_rates: HashMap<String, f64> =
                    env::var("ACTIVITY_SAMPLING_RATES")
                        .ok()
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default();

                ActivityConfig {
                    retention_critical_days: parse_env_i64("ACTIVITY_RETENTION_CRITICAL_DAYS", 365),
                    retention_important_days: parse_env_i64("ACTIVITY_RETENTION_IMPORTANT_DAYS", 180),
                    retention_informational_days: parse_env_i64(
                        "ACTIVITY_RETENTION_INFORMATIONAL_DAYS",
                        90,
                    ),
                    cleanup_interval_secs: parse_env_i64("ACTIVITY_CLEANUP_INTERVAL_SECS", 86_400)
                        as u64,
                    cleanup_batch_size: parse_env_i64("ACTIVITY_CLEANUP_BATCH_SIZE", 1000) as u32,
                    anomaly_detection_enabled: env::var("ACTIVITY_ANOMALY_DETECTION")
                        .map(|s| s.to_lowercase() != "false")
                        .unwrap_or(true),
                    anomaly_session_window_days: parse_env_i64("ACTIVITY_ANOMALY_WINDOW_DAYS", 30),
                    disabled_events,
                    sampling_rates,
                }
            },
            oauth: OAuthConfig {
                allowed_redirect_domains: env::var("OAUTH_ALLOWED_REDIRECT_DOMAINS")
                    .map(|s| {
                        s.split(',')
                            .map(|d| d.trim().to_lowercase())
                            .filter(|d| !d.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                state_max_age_secs: parse_env_i64("OAUTH_STATE_MAX_AGE_SECS", 3600),
            },
            email: EmailConfig {
                dev_mode: env::var("EMAIL_DEV_MODE")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(false),
                default_from: env::var("EMAIL_DEFAULT_FROM")
                    .unwrap_or_else(|_| "no-reply@authgate.local".to_string()),
            },
            telemetry: TelemetryConfig {
                metrics_enabled: env::var("METRICS_ENABLED")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(false),
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate settings that must hold before the server starts
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes");
        }
        if self.is_production() && self.cors.frontend_url.is_none() {
            bail!("FRONTEND_URL is required in production");
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn parse_env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            http_host: "127.0.0.1".to_string(),
            http_port: 8080,
            environment: "development".to_string(),
            database: DatabaseConfig {
                url: "mysql://localhost/test".to_string(),
                max_connections: 10,
                min_connections: 2,
                acquire_timeout_secs: 10,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            jwt: JwtConfig {
                secret: "test-secret-key-that-is-long-enough!".to_string(),
                issuer: "authgate".to_string(),
                access_token_ttl_secs: 900,
                refresh_token_ttl_secs: 2_592_000,
            },
            admin: AdminConfig {
                api_key: None,
                session_ttl_secs: 3600,
                secure_cookies: false,
            },
            cors: CorsConfig {
                frontend_url: None,
                extra_origins: vec![],
            },
            rate_limit: RateLimitConfig::default(),
            activity: ActivityConfig::default(),
            oauth: OAuthConfig {
                allowed_redirect_domains: vec!["example.com".to_string()],
                state_max_age_secs: 3600,
            },
            email: EmailConfig {
                dev_mode: true,
                default_from: "no-reply@authgate.local".to_string(),
            },
            telemetry: TelemetryConfig {
                metrics_enabled: false,
                log_format: "text".to_string(),
            },
        }
    }

    #[test]
    fn test_http_addr() {
        let config = test_config();
        assert_eq!(config.http_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = test_config();
        config.jwt.secret = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_requires_frontend_url() {
        let mut config = test_config();
        config.environment = "production".to_string();
        assert!(config.validate().is_err());

        config.cors.frontend_url = Some("https://app.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_activity_defaults() {
        let activity = ActivityConfig::default();
        assert_eq!(activity.retention_critical_days, 365);
        assert_eq!(activity.retention_important_days, 180);
        assert_eq!(activity.retention_informational_days, 90);
        assert_eq!(activity.cleanup_interval_secs, 86_400);
        assert_eq!(activity.cleanup_batch_size, 1000);
        assert!(activity.anomaly_detection_enabled);
        assert_eq!(activity.anomaly_session_window_days, 30);
    }

    #[test]
    fn test_is_production() {
        let mut config = test_config();
        assert!(!config.is_production());
        config.environment = "production".to_string();
        assert!(config.is_production());
    }
}
