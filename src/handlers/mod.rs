//! HTTP route builders.

pub mod oapi;
pub mod ows;

use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness and readiness probes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(status_ok))
        .route("/ready", get(status_ok))
}

async fn status_ok() -> Json<Value> {
    Json(json!({"status": "OK"}))
}

/// WMS/WFS endpoint. The wildcard tail is the service name and may contain
/// slashes for nested map paths.
pub fn ows_routes() -> Router<AppState> {
    Router::new().route(
        "/ows/*service",
        get(ows::handle_get).post(ows::handle_post),
    )
}

/// OGC API Features endpoint. Unknown methods fall through to the handler so
/// they get the API's own endpoint-not-found error body.
pub fn oapi_routes() -> Router<AppState> {
    Router::new()
        .route("/api/:service/features", any(oapi::handle_root))
        .route("/api/:service/features/", any(oapi::handle_root))
        .route("/api/:service/features/*path", any(oapi::handle))
}
