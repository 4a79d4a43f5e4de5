//! Client IP handling
//!
//! Injects `x-real-ip` from the socket address when no proxy headers are
//! present so `extract_ip()` always has something to read, and provides the
//! shared extraction helper used by rate limiting and activity logging.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use std::net::SocketAddr;

pub async fn inject_client_ip(mut request: Request, next: Next) -> Response {
    let headers = request.headers();
    let has_forwarded = headers.contains_key("x-forwarded-for");
    let has_real_ip = headers.contains_key("x-real-ip");

    if !has_forwarded && !has_real_ip {
        if let Some(addr) = request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
        {
            let ip = addr.0.ip().to_string();
            if let Ok(value) = ip.parse() {
                request.headers_mut().insert("x-real-ip", value);
            }
        }
    }

    next.run(request).await
}

/// Extract the client IP: first `X-Forwarded-For` entry, then `X-Real-IP`
pub fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extract the User-Agent header
pub fn extract_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "5.6.7.8".parse().unwrap());
        assert_eq!(extract_ip(&headers), "1.2.3.4");
    }

    #[test]
    fn test_extract_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "5.6.7.8".parse().unwrap());
        assert_eq!(extract_ip(&headers), "5.6.7.8");
    }

    #[test]
    fn test_extract_ip_unknown() {
        assert_eq!(extract_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_extract_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "curl/8.0".parse().unwrap());
        assert_eq!(extract_user_agent(&headers), "curl/8.0");
        assert_eq!(extract_user_agent(&HeaderMap::new()), "");
    }
}
