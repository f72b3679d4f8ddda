use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reelsync_core::Orchestrator;

pub mod rest;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// The full HTTP surface, with CORS and request tracing.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Runs
        .route(
            "/api/{platform}/{handle}/runs",
            get(rest::api_poll_run).post(rest::api_start_run),
        )
        .route("/api/{platform}/{handle}/runs/status", get(rest::api_run_status))
        .route("/api/{platform}/{handle}/runs/complete", post(rest::api_complete_run))
        // Datasets
        .route("/api/{platform}/{handle}/dataset", get(rest::api_dataset))
        .with_state(state)
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Logging layer: method + path only (no query params)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
