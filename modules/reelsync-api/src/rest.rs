use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::warn;

use reelsync_core::{MergeMode, ProfileKey, SyncError};

use crate::AppState;

#[derive(Deserialize)]
pub struct CompleteQuery {
    mode: Option<String>,
}

// --- Helpers ---

fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::ServiceUnavailable(_) => StatusCode::BAD_GATEWAY,
        SyncError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::NoRun(_) => StatusCode::NOT_FOUND,
        SyncError::RunNotReady { .. } => StatusCode::CONFLICT,
        SyncError::InvalidHandle(_)
        | SyncError::UnknownPlatform(_)
        | SyncError::UnknownMergeMode(_) => StatusCode::BAD_REQUEST,
    }
}

fn error_response(err: SyncError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn profile_key(platform: &str, handle: &str) -> Result<ProfileKey, Response> {
    ProfileKey::parse(platform, handle).map_err(error_response)
}

// --- Handlers ---

pub async fn api_start_run(
    State(state): State<Arc<AppState>>,
    Path((platform, handle)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match profile_key(&platform, &handle) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.orchestrator.start_run(&key).await {
        Ok(started) => {
            let status = if started.started {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(started)).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn api_poll_run(
    State(state): State<Arc<AppState>>,
    Path((platform, handle)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match profile_key(&platform, &handle) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.orchestrator.poll_run(&key).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_run_status(
    State(state): State<Arc<AppState>>,
    Path((platform, handle)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match profile_key(&platform, &handle) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.orchestrator.run_status(&key).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_complete_run(
    State(state): State<Arc<AppState>>,
    Path((platform, handle)): Path<(String, String)>,
    Query(query): Query<CompleteQuery>,
) -> impl IntoResponse {
    let key = match profile_key(&platform, &handle) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let Some(raw_mode) = query.mode else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "mode is required (append-new-posts or refresh-counts)"
            })),
        )
            .into_response();
    };
    let mode = match raw_mode.parse::<MergeMode>() {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };
    match state.orchestrator.complete_run(&key, mode).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_dataset(
    State(state): State<Arc<AppState>>,
    Path((platform, handle)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match profile_key(&platform, &handle) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.orchestrator.dataset(&key).await {
        Ok(Some(dataset)) => {
            let totals = dataset.totals();
            Json(serde_json::json!({
                "dataset": dataset,
                "totals": totals,
            }))
            .into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(e),
    }
}
