//! Chat handler
//!
//! Answers one question through the pipeline. A failed completion is not an
//! HTTP error: the response carries `status: "unavailable"` and a null answer
//! so clients can show a distinct "no answer" state.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use citewise_common::{
    errors::{AppError, FailureReason, Result},
    AnswerOutcome,
};

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1))]
    pub message: String,

    /// Session to record the turn in
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// Chat response
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// "answered" or "unavailable"
    pub status: String,
    /// Reply with the citations block, null when unavailable
    pub answer: Option<String>,
    pub citations: Vec<CitationItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    /// True when references could not be retrieved
    pub retrieval_degraded: bool,
    pub context_tokens: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CitationItem {
    pub index: usize,
    pub locator: String,
    pub title: String,
    /// Display form, e.g. `Slide 3「Ownership」`
    pub label: String,
}

/// Answer a question
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("message".to_string()),
    })?;

    let question = request.message.trim();
    if question.is_empty() {
        return Err(AppError::Validation {
            message: "message must not be blank".to_string(),
            field: Some("message".to_string()),
        });
    }
    if question.chars().count() as u64 > state.config.server.max_message_chars {
        return Err(AppError::Validation {
            message: format!(
                "message exceeds {} characters",
                state.config.server.max_message_chars
            ),
            field: Some("message".to_string()),
        });
    }

    if let Some(id) = request.session_id {
        if !state.sessions.contains(id).await {
            return Err(AppError::SessionNotFound { id: id.to_string() });
        }
    }

    let report = state.pipeline.answer(question).await;

    if let Some(id) = request.session_id {
        state.sessions.record(id, question, &report.outcome).await?;
    }

    tracing::info!(
        session_id = ?request.session_id,
        status = report.outcome.label(),
        citations = report.packed.included(),
        elapsed_ms = report.elapsed_ms,
        "Chat request completed"
    );

    let (answer, error) = match &report.outcome {
        AnswerOutcome::Answered(answer) => (Some(answer.text.clone()), None),
        AnswerOutcome::Unavailable(reason) => (None, Some(reason.clone())),
    };

    let citations = match &report.outcome {
        AnswerOutcome::Answered(answer) => answer
            .citations
            .iter()
            .map(|c| CitationItem {
                index: c.index,
                locator: c.locator.clone(),
                title: c.title.clone(),
                label: c.to_string(),
            })
            .collect(),
        AnswerOutcome::Unavailable(_) => Vec::new(),
    };

    Ok(Json(ChatResponse {
        session_id: request.session_id,
        status: report.outcome.label().to_string(),
        answer,
        citations,
        error,
        retrieval_degraded: report.retrieval_failure.is_some(),
        context_tokens: report.packed.token_count,
        processing_time_ms: report.elapsed_ms,
    }))
}
