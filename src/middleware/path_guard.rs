//! Route-scope guard for app API key paths
//!
//! The URL's `{id}` parameter must equal the tenant-resolved application
//! ID, so an app key holder cannot reach a sibling tenant by editing the
//! URL.

use crate::middleware::tenant::AppContext;
use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;

pub async fn app_path_guard(
    Path(params): Path<HashMap<String, String>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(app_ctx) = request.extensions().get::<AppContext>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "X-App-ID header is required" })),
        )
            .into_response();
    };

    let matches = params
        .get("id")
        .map(|id| id == &app_ctx.0.to_string())
        .unwrap_or(false);

    if !matches {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "X-App-ID header does not match the application in the URL"
            })),
        )
            .into_response();
    }

    next.run(request).await
}
