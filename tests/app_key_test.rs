//! API key authentication and the route-scope guard

mod common;

use authgate::crypto::sha256_hex;
use authgate::domain::{ApiKey, Application, StringUuid};
use authgate::server::build_router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{body_json, build_test_app, TestApp};
use tower::ServiceExt;

fn seed_app_key(app: &TestApp, plaintext: &str, bound_app: StringUuid) {
    app.api_keys.insert(ApiKey {
        id: StringUuid::new_v4(),
        key_type: "app".to_string(),
        name: "ci".to_string(),
        description: None,
        key_hash: sha256_hex(plaintext),
        key_prefix: plaintext.chars().take(8).collect(),
        key_suffix: plaintext.chars().rev().take(4).collect(),
        app_id: Some(bound_app),
        expires_at: None,
        last_used_at: None,
        is_revoked: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });
}

fn seed_second_app(app: &TestApp) -> StringUuid {
    let id = StringUuid::new_v4();
    app.applications.insert(Application {
        id,
        tenant_id: StringUuid::new_v4(),
        name: "Sibling App".to_string(),
        description: None,
        two_fa_enabled: false,
        two_fa_required: false,
        two_fa_methods: String::new(),
        two_fa_issuer_name: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });
    id
}

fn app_request(path: &str, header_app: StringUuid, key: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("X-App-ID", header_app.to_string())
        .header("X-App-API-Key", key)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_app_key_route_guard_matrix() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let a1 = app.app_id;
    let a2 = seed_second_app(&app);
    let key = "agk_app_testkey_0001";
    seed_app_key(&app, key, a1);

    // Matching header, URL, and key binding: 200
    let response = router
        .clone()
        .oneshot(app_request(&format!("/app/{}/config", a1), a1, key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], a1.to_string());

    // Header resolves A1 but the URL names A2: route-scope guard rejects
    let response = router
        .clone()
        .oneshot(app_request(&format!("/app/{}/config", a2), a1, key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["error"],
        "X-App-ID header does not match the application in the URL"
    );

    // Header resolves A2, but the key is bound to A1: key check rejects
    let response = router
        .clone()
        .oneshot(app_request(&format!("/app/{}/config", a2), a2, key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"],
        "API key does not match the application"
    );
}

#[tokio::test]
async fn test_revoked_app_key_rejected() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let key = "agk_app_revoked_0001";
    seed_app_key(&app, key, app.app_id);
    let id = app.api_keys.keys.lock().unwrap().values().next().unwrap().id;
    {
        let mut keys = app.api_keys.keys.lock().unwrap();
        keys.get_mut(&id).unwrap().is_revoked = true;
    }

    let response = router
        .oneshot(app_request(
            &format!("/app/{}/config", app.app_id),
            app.app_id,
            key,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_app_key_rejected() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/app/{}/config", app.app_id))
                .header("X-App-ID", app.app_id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_key_never_authenticates_app_routes() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    // Seed an admin-type key in the store
    let admin_key = "agk_adm_admin_00001";
    app.api_keys.insert(ApiKey {
        id: StringUuid::new_v4(),
        key_type: "admin".to_string(),
        name: "ops".to_string(),
        description: None,
        key_hash: sha256_hex(admin_key),
        key_prefix: admin_key.chars().take(8).collect(),
        key_suffix: admin_key.chars().rev().take(4).collect(),
        app_id: None,
        expires_at: None,
        last_used_at: None,
        is_revoked: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });

    // Admin keys are rejected on /app routes
    let response = router
        .clone()
        .oneshot(app_request(
            &format!("/app/{}/config", app.app_id),
            app.app_id,
            admin_key,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // But the same key reaches the control plane
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/tenants")
                .header("X-Admin-API-Key", admin_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_static_admin_key_constant_time_path() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    // Configured in common::test_config
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/tenants")
                .header("X-Admin-API-Key", "static-admin-test-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/tenants")
                .header("X-Admin-API-Key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_app_key_sees_only_its_users() {
    let app = build_test_app(false);
    let router = build_router(app.state.clone());

    let key = "agk_app_users_00001";
    seed_app_key(&app, key, app.app_id);

    let response = router
        .oneshot(app_request(
            &format!("/app/{}/users", app.app_id),
            app.app_id,
            key,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["users"].is_array());
}
