//! HTTP API (spec.md §7): search, frame-image retrieval, app sessions, and
//! health/stats, mirroring the teacher's `State<Arc<AppState>>` + `Json`
//! handler pattern with tuple `(StatusCode, Json<Value>)` errors.

mod frames;
mod health;
mod search;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::container::ServiceContainer;

pub fn build_router(container: Arc<ServiceContainer>) -> Router {
    Router::new()
        .route("/search", get(search::search_handler))
        .route("/frames/:id/image", get(frames::frame_image_handler))
        .route("/sessions", get(frames::app_sessions_handler))
        .route("/health", get(health::health_handler))
        .route("/stats", get(health::stats_handler))
        .with_state(container)
}
