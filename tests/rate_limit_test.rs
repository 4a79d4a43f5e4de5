//! Rate limit behavior through the router (in-process store)

mod common;

use authgate::server::build_router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_json, build_test_app};
use serde_json::json;
use tower::ServiceExt;

fn login_request(app_id: authgate::domain::StringUuid, ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .header("X-App-ID", app_id.to_string())
        .header("x-real-ip", ip)
        .body(Body::from(
            serde_json::to_vec(&json!({
                "email": "nobody@example.com",
                "password": "Wrong999!"
            }))
            .unwrap(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_login_limit_and_lockout_progression() {
    let app = build_test_app(true);
    let router = build_router(app.state.clone());
    let ip = "198.51.100.4";

    // Preset: 5 per minute, lockout at 10 attempts
    for i in 1..=5 {
        let response = router.clone().oneshot(login_request(app.app_id, ip)).await.unwrap();
        // Unknown user: the handler answers 401, not the limiter
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "request {}", i);
    }

    for i in 6..=10 {
        let response = router.clone().oneshot(login_request(app.app_id, ip)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS,
            "request {}",
            i
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], "Too many requests", "request {}", i);
    }

    // The tenth attempt tripped the hard lockout
    let response = router.clone().oneshot(login_request(app.app_id, ip)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert!(
        body["error"].as_str().unwrap().to_lowercase().contains("locked"),
        "request 11 should report the lockout, got {}",
        body["error"]
    );
}

#[tokio::test]
async fn test_limits_are_per_ip() {
    let app = build_test_app(true);
    let router = build_router(app.state.clone());

    for _ in 0..8 {
        router
            .clone()
            .oneshot(login_request(app.app_id, "198.51.100.5"))
            .await
            .unwrap();
    }

    // A different caller is unaffected
    let response = router
        .clone()
        .oneshot(login_request(app.app_id, "198.51.100.6"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_preset_is_tighter() {
    let app = build_test_app(true);
    let router = build_router(app.state.clone());
    let ip = "198.51.100.7";

    let request = |n: u32| {
        Request::builder()
            .method("POST")
            .uri("/auth/register")
            .header("content-type", "application/json")
            .header("X-App-ID", app.app_id.to_string())
            .header("x-real-ip", ip)
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "email": format!("user{}@example.com", n),
                    "password": "Secret123!"
                }))
                .unwrap(),
            ))
            .unwrap()
    };

    for n in 0..3 {
        let response = router.clone().oneshot(request(n)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.clone().oneshot(request(99)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_successful_login_clears_counter() {
    let app = build_test_app(true);
    let router = build_router(app.state.clone());
    let ip = "198.51.100.8";

    // Seed a verified user
    use authgate::domain::EmailType;
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header("content-type", "application/json")
                .header("X-App-ID", app.app_id.to_string())
                .header("x-real-ip", "192.0.2.1")
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "email": "carol@example.com",
                        "password": "Secret123!"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let token = app
        .mailer
        .last_variable(EmailType::EmailVerification, "token")
        .unwrap();
    router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/verify-email?token={}", token))
                .header("X-App-ID", app.app_id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let login = |password: &str| {
        Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header("content-type", "application/json")
            .header("X-App-ID", app.app_id.to_string())
            .header("x-real-ip", ip)
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "email": "carol@example.com",
                    "password": password
                }))
                .unwrap(),
            ))
            .unwrap()
    };

    // Four failures, then a success clears the window
    for _ in 0..4 {
        let response = router.clone().oneshot(login("Wrong999!")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = router.clone().oneshot(login("Secret123!")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Five more attempts fit into the fresh window
    for _ in 0..4 {
        let response = router.clone().oneshot(login("Wrong999!")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = router.clone().oneshot(login("Secret123!")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
