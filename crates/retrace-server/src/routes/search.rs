use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use retrace_search::{SearchFilters, SearchMode, SearchQuery};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::container::ServiceContainer;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub app: Option<String>,
    pub exclude_app: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn search_handler(
    State(state): State<Arc<ServiceContainer>>,
    Query(params): Query<SearchParams>,
) -> Result<JsonResponse<retrace_search::SearchResults>, (StatusCode, JsonResponse<Value>)> {
    if params.q.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            JsonResponse(json!({"error": "query text must not be empty"})),
        ));
    }

    let mode = match params.mode.as_deref() {
        Some("all") => SearchMode::All,
        _ => SearchMode::Relevant,
    };

    let query = SearchQuery {
        text: params.q,
        filters: SearchFilters {
            start_date: params.start_time,
            end_date: params.end_time,
            include_apps: params.app.map(|a| vec![a]),
            exclude_apps: params.exclude_app.map(|a| vec![a]),
        },
        mode,
        limit: params.limit.unwrap_or(20),
        offset: params.offset.unwrap_or(0),
    };

    state.federation.search(&query).await.map(JsonResponse).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonResponse(json!({"error": format!("search failed: {e}")})),
        )
    })
}
