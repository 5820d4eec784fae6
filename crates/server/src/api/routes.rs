use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{downloads, handlers, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Config
        .route("/config", get(handlers::get_config))
        // Download jobs
        .route("/downloads", post(downloads::submit))
        .route("/downloads", get(downloads::list))
        .route("/downloads/status", get(downloads::status))
        .route("/downloads/{id}", get(downloads::get))
        .route("/downloads/{id}", delete(downloads::prune))
        .route("/downloads/{id}/cancel", post(downloads::cancel))
        .route("/downloads/{id}/resubmit", post(downloads::resubmit))
        // Real-time updates
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::get_metrics))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
