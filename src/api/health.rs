//! Health and metrics endpoints

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness: database and KV store reachable
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();
    let kv_ok = state.kv.ping().await.is_ok();

    let status = if db_ok && kv_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "database": if db_ok { "ok" } else { "unavailable" },
            "kv_store": if kv_ok { "ok" } else { "unavailable" },
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
