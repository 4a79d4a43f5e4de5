//! Security headers middleware
//!
//! Adds standard security headers to all responses. The content security
//! policy is strict for API paths and relaxed for the admin GUI and docs,
//! which render in a browser.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    pub hsts_enabled: bool,
    pub hsts_max_age_secs: u64,
    pub hsts_include_subdomains: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            hsts_enabled: false,
            hsts_max_age_secs: 31_536_000,
            hsts_include_subdomains: true,
        }
    }
}

const API_CSP: &str = "default-src 'none'; frame-ancestors 'none'";
const GUI_CSP: &str =
    "default-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'; \
     frame-ancestors 'none'";

fn is_browser_path(path: &str) -> bool {
    path.starts_with("/gui") || path.starts_with("/docs")
}

pub async fn security_headers_middleware(
    State(config): State<SecurityHeadersConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // HSTS only when TLS is terminated in front of us; sending it over
    // plain HTTP causes long-lived browser lockouts in dev.
    let should_add_hsts = config.hsts_enabled
        && request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("https"))
            .unwrap_or(false);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(header::X_CONTENT_TYPE_OPTIONS, "nosniff".parse().unwrap());
    headers.insert(header::X_FRAME_OPTIONS, "DENY".parse().unwrap());
    headers.insert(
        header::REFERRER_POLICY,
        "strict-origin-when-cross-origin".parse().unwrap(),
    );
    headers.insert(
        header::CACHE_CONTROL,
        "no-store, no-cache, must-revalidate, private"
            .parse()
            .unwrap(),
    );
    headers.insert(
        "Permissions-Policy",
        "geolocation=(), microphone=(), camera=()".parse().unwrap(),
    );

    let csp = if is_browser_path(&path) { GUI_CSP } else { API_CSP };
    headers.insert(header::CONTENT_SECURITY_POLICY, csp.parse().unwrap());

    if should_add_hsts {
        let mut value = format!("max-age={}", config.hsts_max_age_secs);
        if config.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }
        headers.insert(header::STRICT_TRANSPORT_SECURITY, value.parse().unwrap());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    async fn dummy_handler() -> &'static str {
        "OK"
    }

    fn app(config: SecurityHeadersConfig) -> Router {
        Router::new()
            .route("/api/test", get(dummy_handler))
            .route("/gui/test", get(dummy_handler))
            .layer(axum::middleware::from_fn_with_state(
                config,
                security_headers_middleware,
            ))
    }

    #[tokio::test]
    async fn test_headers_added() {
        let response = app(SecurityHeadersConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/api/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-Content-Type-Options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("Referrer-Policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert_eq!(
            response.headers().get("Content-Security-Policy").unwrap(),
            API_CSP
        );
    }

    #[tokio::test]
    async fn test_gui_paths_get_relaxed_csp() {
        let response = app(SecurityHeadersConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/gui/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("Content-Security-Policy").unwrap(),
            GUI_CSP
        );
    }

    #[tokio::test]
    async fn test_hsts_only_behind_tls() {
        let config = SecurityHeadersConfig {
            hsts_enabled: true,
            ..Default::default()
        };

        // No forwarded proto: no HSTS
        let response = app(config.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get("Strict-Transport-Security").is_none());

        // https forwarded proto: HSTS present
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/api/test")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let hsts = response
            .headers()
            .get("Strict-Transport-Security")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(hsts.starts_with("max-age=31536000"));
        assert!(hsts.contains("includeSubDomains"));
    }
}
