//! API router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/environments",
            get(handlers::list_environments).post(handlers::create_environment),
        )
        .route(
            "/environments/:id",
            get(handlers::get_environment)
                .put(handlers::update_environment)
                .delete(handlers::delete_environment),
        )
        .route("/environments/:id/start", post(handlers::start_environment))
        .route("/environments/:id/stop", post(handlers::stop_environment))
        .route("/environments/:id/restart", post(handlers::restart_environment))
        .route("/environments/:id/status", get(handlers::environment_status))
        .route("/environments/:id/logs", get(handlers::stream_logs));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
