//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    pub pipeline: PipelineCheck,
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct PipelineCheck {
    pub status: String,
    pub chat_model: String,
    pub token_budget: usize,
    pub search_provider: String,
}

/// Liveness check, healthy whenever the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: citewise_common::VERSION,
    })
}

/// Readiness check reporting the pipeline the gateway was started with
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready".to_string(),
        checks: ReadyChecks {
            pipeline: PipelineCheck {
                status: "up".to_string(),
                chat_model: state.pipeline.chat_model().to_string(),
                token_budget: state.pipeline.token_budget(),
                search_provider: state.config.search.provider.clone(),
            },
            active_sessions: state.sessions.len().await,
        },
    })
}
