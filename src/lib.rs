pub mod auth;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod oapi;
pub mod ogc;
pub mod permissions;
pub mod state;
pub mod wfs;
pub mod wms;

use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health_routes())
        .merge(handlers::ows_routes())
        .merge(handlers::oapi_routes())
        .layer(from_fn_with_state(state.clone(), middleware::auth::resolve_identity))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
