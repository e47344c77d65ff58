use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::ResearchOptions;
use crate::research::validate_options;

use super::app_state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/research", post(research_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResearchRequest {
    query: String,
    #[serde(default)]
    is_deep: bool,
    depth: Option<u8>,
    breadth: Option<u8>,
    model_id: Option<String>,
}

/// `POST /research` — streams newline-delimited JSON `EventRecord`s. This
/// endpoint is a thin transport binding; the event sequence it carries is
/// the actual contract (see `research::engine`).
async fn research_handler(State(state): State<Arc<AppState>>, Json(req): Json<ResearchRequest>) -> Response {
    let options = ResearchOptions {
        is_deep: req.is_deep,
        depth: req.depth.unwrap_or(2),
        breadth: req.breadth.unwrap_or(2),
        model_id: req.model_id.unwrap_or_else(|| state.config.resolve_default_model_id()),
        max_concurrency: state.config.engine.resolve_max_concurrency(),
    };

    let (query, options) = match validate_options(
        &req.query,
        options,
        state.config.engine.resolve_max_depth(),
        state.config.engine.resolve_max_breadth(),
    ) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let event_buffer_size = state.config.engine.resolve_event_buffer_size();
    let (rx, _cancel) = state.engine.clone().run(query, options, event_buffer_size);

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(mut line) => {
                    line.push('\n');
                    yield Ok::<Bytes, std::io::Error>(Bytes::from(line));
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize event record");
                }
            }
        }
    };

    Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(stream))
        .expect("static response headers are always valid")
}
