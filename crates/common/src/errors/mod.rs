//! Error types for Citewise
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each external collaborator (embedding, search, completion, tokenizer)
//! - Retry classification for the resilience layer
//! - HTTP status code mapping and structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Resource errors (4xxx)
    SessionNotFound,

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    SearchError,
    CompletionError,
    TokenizationError,
    Timeout,
    DeadlineExceeded,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::SessionNotFound => 4005,

            ErrorCode::RateLimited => 6001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::SearchError => 8003,
            ErrorCode::CompletionError => 8004,
            ErrorCode::TokenizationError => 8005,
            ErrorCode::Timeout => 8006,
            ErrorCode::DeadlineExceeded => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    // Resource errors
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Search service error: {message}")]
    SearchError { message: String },

    #[error("Completion service error: {message}")]
    CompletionError { message: String },

    #[error("Tokenization failed for model '{model}': {message}")]
    TokenizationError { model: String, message: String },

    #[error("{service} returned HTTP {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} call timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("Request deadline exceeded before {service} call completed")]
    DeadlineExceeded { service: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::SearchError { .. } => ErrorCode::SearchError,
            AppError::CompletionError { .. } => ErrorCode::CompletionError,
            AppError::TokenizationError { .. } => ErrorCode::TokenizationError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::SessionNotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::TokenizationError { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. } |
            AppError::SearchError { .. } |
            AppError::CompletionError { .. } |
            AppError::Upstream { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::Timeout { .. } |
            AppError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether a failed external call may succeed if attempted again.
    ///
    /// Timeouts, transport failures, throttling and 5xx responses are transient.
    /// Malformed responses, auth failures and an exhausted request deadline are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout { .. } => true,
            AppError::Upstream { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            AppError::HttpClient(e) => {
                if e.is_decode() || e.is_builder() {
                    return false;
                }
                match e.status() {
                    Some(status) => status.is_server_error() || status.as_u16() == 429,
                    None => e.is_timeout() || e.is_connect() || e.is_request(),
                }
            }
            _ => false,
        }
    }

    /// Attribute a failed embedding call to the embedding stage.
    ///
    /// The original error survives as the message so transport, status and
    /// deadline details are not lost.
    pub fn into_embedding_error(self) -> AppError {
        match self {
            err @ AppError::EmbeddingError { .. } => err,
            other => AppError::EmbeddingError { message: other.to_string() },
        }
    }

    /// Attribute a failed search call to the search stage.
    pub fn into_search_error(self) -> AppError {
        match self {
            err @ AppError::SearchError { .. } => err,
            other => AppError::SearchError { message: other.to_string() },
        }
    }

    /// Attribute a failed completion call to the completion stage.
    pub fn into_completion_error(self) -> AppError {
        match self {
            err @ AppError::CompletionError { .. } => err,
            other => AppError::CompletionError { message: other.to_string() },
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation { field: Some(field), .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Why a stage produced degraded output instead of a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&AppError> for FailureReason {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SessionNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::SessionNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Empty message".into(),
            field: Some("message".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_upstream_retry_classification() {
        let throttled = AppError::Upstream {
            service: "embedding".into(),
            status: 429,
            message: "slow down".into(),
        };
        let unavailable = AppError::Upstream {
            service: "search".into(),
            status: 503,
            message: "busy".into(),
        };
        let unauthorized = AppError::Upstream {
            service: "completion".into(),
            status: 401,
            message: "bad key".into(),
        };

        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!unauthorized.is_retryable());
    }

    #[test]
    fn test_deadline_is_not_retryable() {
        let timeout = AppError::Timeout { service: "search".into(), timeout_ms: 100 };
        let deadline = AppError::DeadlineExceeded { service: "search".into() };
        let malformed = AppError::EmbeddingError { message: "wrong dimension".into() };

        assert!(timeout.is_retryable());
        assert!(!deadline.is_retryable());
        assert!(!malformed.is_retryable());
        assert_eq!(deadline.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_stage_attribution_keeps_cause() {
        let outage = AppError::Upstream {
            service: "embedding".into(),
            status: 503,
            message: "busy".into(),
        };
        let err = outage.into_embedding_error();
        assert_eq!(err.code(), ErrorCode::EmbeddingError);
        assert!(err.to_string().contains("HTTP 503"));

        let deadline = AppError::DeadlineExceeded { service: "search".into() }.into_search_error();
        assert_eq!(deadline.code(), ErrorCode::SearchError);
        assert!(deadline.to_string().contains("deadline"));

        let already = AppError::CompletionError { message: "empty".into() }.into_completion_error();
        assert_eq!(already.to_string(), "Completion service error: empty");
    }

    #[test]
    fn test_numeric_codes_are_grouped() {
        assert_eq!(ErrorCode::EmbeddingError.as_code() / 1000, 8);
        assert_eq!(ErrorCode::CompletionError.as_code() / 1000, 8);
        assert_eq!(ErrorCode::ValidationError.as_code() / 1000, 1);
    }
}
