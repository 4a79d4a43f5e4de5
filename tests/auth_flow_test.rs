//! End-to-end identity flows through the full router

mod common;

use authgate::domain::EmailType;
use authgate::server::build_router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_json, build_test_app, json_request};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_register_verify_login_access_profile() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    // Register
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            Some(app.app_id),
            json!({ "email": "alice@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["email_verified"], false);

    // Login before verification is forbidden
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "alice@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "Email not verified");

    // Read the verification token from the email sink
    let token = app
        .mailer
        .last_variable(EmailType::EmailVerification, "token")
        .expect("verification email was sent");

    let response = router
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
    assert_eq!(response.status(), StatusCode::OK);

    // Login now succeeds with a token pair
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "alice@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let access = body["access_token"].as_str().unwrap().to_string();
    assert!(body["refresh_token"].is_string());

    // Access token reaches the profile
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/profile")
                .header("X-App-ID", app.app_id.to_string())
                .header("Authorization", format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile = body_json(response).await;
    assert_eq!(profile["email"], "alice@example.com");
    assert_eq!(profile["email_verified"], true);
}

async fn register_and_login(
    app: &common::TestApp,
    router: &axum::Router,
) -> (String, String) {
    router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            Some(app.app_id),
            json!({ "email": "bob@example.com", "password": "Secret123!" }),
        ))
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

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "bob@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["refresh_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_logout_blacklists_access_token() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());
    let (access, refresh) = register_and_login(&app, &router).await;

    // Logout with both tokens
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header("X-App-ID", app.app_id.to_string())
                .header("Authorization", format!("Bearer {}", access))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "refresh_token": refresh })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The same access token is now rejected until its natural expiry
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/profile")
                .header("X-App-ID", app.app_id.to_string())
                .header("Authorization", format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Token has been revoked");
}

#[tokio::test]
async fn test_refresh_rotation() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());
    let (_, refresh0) = register_and_login(&app, &router).await;

    // First rotation succeeds
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/refresh-token",
            Some(app.app_id),
            json!({ "refresh_token": refresh0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let refresh1 = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(refresh0, refresh1);

    // Replaying the rotated-out token fails
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/refresh-token",
            Some(app.app_id),
            json!({ "refresh_token": refresh0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"],
        "Refresh token revoked or invalid"
    );

    // The fresh token keeps working
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/refresh-token",
            Some(app.app_id),
            json!({ "refresh_token": refresh1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_password_reset_revokes_outstanding_tokens() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());
    let (access, _) = register_and_login(&app, &router).await;

    // Request a reset
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/forgot-password",
            Some(app.app_id),
            json!({ "email": "bob@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let token = app
        .mailer
        .last_variable(EmailType::PasswordReset, "token")
        .expect("reset email was sent");

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/reset-password",
            Some(app.app_id),
            json!({ "token": token, "new_password": "Fresh456!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Tokens issued before the reset are rejected
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/profile")
                .header("X-App-ID", app.app_id.to_string())
                .header("Authorization", format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The new password logs in
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "bob@example.com", "password": "Fresh456!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forgot_password_is_generic_for_unknown_email() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(json_request(
            "POST",
            "/auth/forgot-password",
            Some(app.app_id),
            json!({ "email": "ghost@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.mailer.count(EmailType::PasswordReset), 0);
}

#[tokio::test]
async fn test_email_two_fa_login_roundtrip() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());
    let (access, _) = register_and_login(&app, &router).await;

    // Enroll with the email method
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/2fa/enable")
                .header("X-App-ID", app.app_id.to_string())
                .header("Authorization", format!("Bearer {}", access))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "method": "email" })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let code = app
        .mailer
        .last_variable(EmailType::TwoFaCode, "code")
        .expect("2FA code email was sent");

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/2fa/verify")
                .header("X-App-ID", app.app_id.to_string())
                .header("Authorization", format!("Bearer {}", access))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json!({ "code": code })).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let recovery_codes = body["recovery_codes"].as_array().unwrap();
    assert_eq!(recovery_codes.len(), 10);

    // Login now requires the second factor
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "bob@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["requires_two_fa"], true);
    assert_eq!(body["two_fa_method"], "email");
    assert!(body["access_token"].is_null());
    let temp_token = body["temp_token"].as_str().unwrap().to_string();

    let code = app
        .mailer
        .last_variable(EmailType::TwoFaCode, "code")
        .unwrap();

    // Complete with the mailed code
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/2fa/login",
            Some(app.app_id),
            json!({ "temp_token": temp_token, "code": code }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["access_token"].is_string());

    // Recovery codes are one-shot: use one on a new challenge
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "bob@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    let temp_token = body_json(response).await["temp_token"]
        .as_str()
        .unwrap()
        .to_string();
    let recovery = recovery_codes[0].as_str().unwrap();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/2fa/login",
            Some(app.app_id),
            json!({ "temp_token": temp_token, "recovery_code": recovery }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Second use of the same recovery code fails
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            Some(app.app_id),
            json!({ "email": "bob@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    let temp_token = body_json(response).await["temp_token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/2fa/login",
            Some(app.app_id),
            json!({ "temp_token": temp_token, "recovery_code": recovery }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let request = || {
        json_request(
            "POST",
            "/auth/register",
            Some(app.app_id),
            json!({ "email": "dup@example.com", "password": "Secret123!" }),
        )
    };

    let first = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_app_header_rejected() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": "a@example.com", "password": "Secret123!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "X-App-ID header is required"
    );
}

#[tokio::test]
async fn test_activity_events_recorded() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());
    let _ = register_and_login(&app, &router).await;

    // Fire-and-forget writes need a moment to land
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let events = app.activity.events();
    assert!(events.contains(&"REGISTER".to_string()));
    assert!(events.contains(&"EMAIL_VERIFY".to_string()));
    assert!(events.contains(&"LOGIN".to_string()));
}
