//! Read-only HTTP surface (SPEC_FULL §4.8/C14): health, agent liveness, pipeline progress.
//!
//! Grounded on `src/api/mod.rs`'s axum `Router`/`State`/`TraceLayer`/`CorsLayer` stack, trimmed
//! to read-only progress/heartbeat routes — the CRUD task/workspace/Discord endpoints this
//! crate has no analog for are dropped.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::heartbeat::HeartbeatStore;
use crate::progress::ProgressStore;
use crate::registry::AgentRegistry;

const SERVICE_NAME: &str = "spiral-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct ApiServer {
    state: ApiState,
}

#[derive(Clone)]
struct ApiState {
    registry: Arc<AgentRegistry>,
    heartbeats: Arc<HeartbeatStore>,
    progress: Arc<ProgressStore>,
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiServer {
    pub fn new(
        registry: Arc<AgentRegistry>,
        heartbeats: Arc<HeartbeatStore>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        Self {
            state: ApiState {
                registry,
                heartbeats,
                progress,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/agents/heartbeats", get(list_heartbeats))
            .route("/agents/heartbeats/{name}", get(get_heartbeat))
            .route("/progress/{entity_type}/{entity_id}", get(get_progress))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn serve(&self, host: &str, port: u16) -> crate::error::Result<()> {
        let addr = format!("{host}:{port}");
        tracing::info!(%addr, "api server listening");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::SpiralError::Config(format!("failed to bind {addr}: {e}")))?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::error::SpiralError::Config(format!("api server error: {e}")))
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

async fn list_heartbeats(State(state): State<ApiState>) -> impl IntoResponse {
    let mut beats = Vec::new();
    for name in state.registry.names() {
        if let Ok(Some(beat)) = state.heartbeats.get(name).await {
            beats.push(beat);
        }
    }
    Json(json!({ "agents": beats }))
}

async fn get_heartbeat(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.heartbeats.get(&name).await {
        Ok(Some(beat)) => Json(beat).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("no heartbeat recorded for agent '{name}'"),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError { error: e.to_string() }),
        )
            .into_response(),
    }
}

async fn get_progress(
    State(state): State<ApiState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> axum::response::Response {
    match state.progress.get_entity(&entity_type, &entity_id).await {
        Ok(Some(entity)) => Json(entity).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("no progress recorded for {entity_type}:{entity_id}"),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError { error: e.to_string() }),
        )
            .into_response(),
    }
}
