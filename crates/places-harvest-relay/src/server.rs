//! Ingest HTTP server: accepts exchanges observed elsewhere (a browser
//! extension, a proxy) and runs them through capture post-processing.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json as AxumJson,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::pipeline::CapturePipeline;
use crate::status::{StatusBoard, StatusSnapshot};
use crate::types::{RelayError, RelayResult};

/// Shared state passed to all handlers via axum State.
pub struct ServerState {
    pub pipeline: Arc<CapturePipeline>,
    pub status: StatusBoard,
}

/// One observed request/response exchange.
#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub url: String,
    pub body: String,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct CaptureReply {
    pub matched: bool,
    pub enqueued: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct IngestServer {
    state: Arc<ServerState>,
}

impl IngestServer {
    pub fn new(pipeline: Arc<CapturePipeline>, status: StatusBoard) -> Self {
        Self {
            state: Arc::new(ServerState { pipeline, status }),
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until the shutdown future resolves.
    pub async fn run(
        &self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> RelayResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(RelayError::Io)?;

        tracing::info!("Ingest server listening on {addr}");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(RelayError::Io)?;

        Ok(())
    }
}

/// Build the ingest router. Any origin may post captures.
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/capture", post(handle_capture))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

async fn handle_capture(
    State(state): State<Arc<ServerState>>,
    AxumJson(request): AxumJson<CaptureRequest>,
) -> AxumJson<CaptureReply> {
    if !state.pipeline.layout().matches(&request.url) {
        return AxumJson(CaptureReply::default());
    }

    let reply = match state.pipeline.process(&request.body) {
        Ok(summary) => CaptureReply {
            matched: true,
            enqueued: summary.enqueued,
            discarded: Some(summary.discarded),
            error: None,
        },
        Err(e) => {
            tracing::warn!("Failed to decode capture from {}: {e}", request.url);
            CaptureReply {
                matched: true,
                enqueued: 0,
                discarded: None,
                error: Some(e.to_string()),
            }
        }
    };
    AxumJson(reply)
}

async fn handle_status(State(state): State<Arc<ServerState>>) -> AxumJson<StatusSnapshot> {
    AxumJson(state.status.snapshot())
}

async fn handle_health() -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
