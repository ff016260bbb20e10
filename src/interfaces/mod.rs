pub mod rest;
pub mod ws;

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::application::system::Application;

/// Builds the full HTTP surface: control endpoints, the streaming upgrade,
/// health and metrics.
pub fn router(app: Arc<Application>) -> Router {
    Router::new()
        .route("/history", get(rest::history))
        .route("/history/latest", get(rest::history_latest))
        .route("/prediction/trigger", post(rest::trigger_prediction))
        .route("/prediction/latest", get(rest::prediction_latest))
        .route("/prediction/:id", get(rest::prediction_by_id))
        .route("/training/enqueue", post(rest::training_enqueue))
        .route("/training/status", get(rest::training_status))
        .route("/health", get(rest::health))
        .route("/metrics", get(rest::metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
