use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::container::ServiceContainer;
use crate::lifecycle::LifecycleState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_depth: i64,
    pub secondary_sources: usize,
}

pub async fn health_handler(
    State(state): State<Arc<ServiceContainer>>,
) -> Result<JsonResponse<HealthResponse>, (StatusCode, JsonResponse<Value>)> {
    let status = match state.lifecycle.state().await {
        LifecycleState::Errored(cause) => format!("errored: {cause}"),
        other => format!("{other:?}").to_lowercase(),
    };

    let queue_depth = state.queue.depth().await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonResponse(json!({"error": format!("failed to read queue depth: {e}")})),
        )
    })?;

    Ok(JsonResponse(HealthResponse {
        status,
        queue_depth,
        secondary_sources: state.federation.secondary_count(),
    }))
}

pub async fn stats_handler(
    State(state): State<Arc<ServiceContainer>>,
) -> Result<JsonResponse<retrace_db::StorageStats>, (StatusCode, JsonResponse<Value>)> {
    state.primary_db.stats().await.map(JsonResponse).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonResponse(json!({"error": format!("failed to read stats: {e}")})),
        )
    })
}
