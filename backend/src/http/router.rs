//! Router configuration for the HTTP API.
//!
//! Sets up all routes and middleware (CORS, compression, tracing).

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/dashboard", get(handlers::dashboard))
        .route("/availability", post(handlers::set_availability))
        .route("/breaks", post(handlers::start_break))
        // Admin
        .route("/admin", get(handlers::admin_overview))
        .route("/admin/schedules/{schedule_id}", delete(handlers::delete_schedule))
        .route(
            "/admin/schedules/{schedule_id}/availability",
            put(handlers::set_schedule_availability),
        )
        .route("/admin/breaks/{break_id}", delete(handlers::delete_break));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_v1)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
