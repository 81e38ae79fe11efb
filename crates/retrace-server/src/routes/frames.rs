use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json as JsonResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::container::ServiceContainer;

pub async fn frame_image_handler(
    State(state): State<Arc<ServiceContainer>>,
    Path(frame_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, JsonResponse<Value>)> {
    let frame = state.federation.get_frame(frame_id).await.map_err(|e| {
        (
            StatusCode::NOT_FOUND,
            JsonResponse(json!({"error": format!("frame {frame_id} not found: {e}")})),
        )
    })?;

    let image = state.federation.read_frame_image(&frame).await.map_err(|e| {
        (
            StatusCode::NOT_FOUND,
            JsonResponse(json!({"error": format!("could not read image for frame {frame_id}: {e}")})),
        )
    })?;

    let mut bytes: Vec<u8> = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                JsonResponse(json!({"error": format!("could not encode image: {e}")})),
            )
        })?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
}

pub async fn app_sessions_handler(
    State(state): State<Arc<ServiceContainer>>,
    Query(params): Query<RangeParams>,
) -> Result<JsonResponse<Vec<retrace_core::types::AppSession>>, (StatusCode, JsonResponse<Value>)> {
    let sessions = state
        .federation
        .get_app_sessions(params.start, params.end)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                JsonResponse(json!({"error": format!("failed to list sessions: {e}")})),
            )
        })?;

    Ok(JsonResponse((*sessions).clone()))
}
