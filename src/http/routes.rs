use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/session/connect", post(handlers::connect))
        .route("/session/disconnect", post(handlers::disconnect))
        // Presentation reads
        .route("/session/status", get(handlers::get_status))
        .route("/session/log", get(handlers::get_log))
        .route("/device", get(handlers::get_device_state))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
