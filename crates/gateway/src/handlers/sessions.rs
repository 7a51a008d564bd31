//! Session management handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use citewise_common::{errors::Result, session::Turn};

/// Create session response
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Session state response
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

/// Create a new session
pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session = state.sessions.create().await;

    tracing::info!(session_id = %session.id, "Session created");

    (StatusCode::CREATED, Json(CreateSessionResponse {
        session_id: session.id,
        created_at: session.created_at,
    }))
}

/// Get session history
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let session = state.sessions.get(session_id).await?;

    Ok(Json(SessionResponse {
        session_id: session.id,
        created_at: session.created_at,
        turns: session.turns,
    }))
}

/// Delete a session and its history
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.sessions.remove(session_id).await?;

    tracing::info!(session_id = %session_id, "Session deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Download the session history as plain text
pub async fn transcript(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.sessions.get(session_id).await?;
    let body = session.transcript(&state.config.prompt.unavailable_message);

    let disposition = format!("attachment; filename=\"chat_history_{}.txt\"", session_id);

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}
