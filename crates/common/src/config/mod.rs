//! Configuration management for Citewise services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Legacy variable names (OPENAI_API_KEY, AZURE_AI_SEARCH_ENDPOINT, ...)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Embedding and chat completion service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Search index configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Retrieval and context packing knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Timeouts and retries around external calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Prompt wording
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum question length accepted by the chat endpoint
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: u64,

    /// Live sessions kept in memory; the oldest is evicted beyond this
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider for embeddings and completions: openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the OpenAI-compatible service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Chat completion model; also selects the tokenizer for the context budget
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Sampling temperature for completions
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Search provider: azure, memory
    #[serde(default = "default_search_provider")]
    pub provider: String,

    /// Azure AI Search endpoint (https://<name>.search.windows.net)
    pub endpoint: Option<String>,

    /// Azure AI Search query key
    pub api_key: Option<String>,

    /// Index name
    pub index_name: Option<String>,

    /// REST API version
    #[serde(default = "default_search_api_version")]
    pub api_version: String,

    /// Vector field queried by the hybrid search
    #[serde(default = "default_vector_field")]
    pub vector_field: String,

    /// Document field carrying the page or slide number
    #[serde(default = "default_page_field")]
    pub page_field: String,

    /// Document field carrying the title
    #[serde(default = "default_title_field")]
    pub title_field: String,

    /// Document field carrying the passage body
    #[serde(default = "default_content_field")]
    pub content_field: String,

    /// Prefix placed before the page value to build a source locator
    #[serde(default = "default_locator_prefix")]
    pub locator_prefix: String,

    /// JSONL file loaded by the in-memory index
    pub documents_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum tokens of packed context
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Candidates requested from the search index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Deadline for a whole question, in seconds (0 disables)
    #[serde(default = "default_request_deadline")]
    pub request_deadline_secs: u64,

    /// What the packer does when a token count cannot be measured: conservative, stop
    #[serde(default = "default_unmeasured_policy")]
    pub unmeasured_policy: String,

    /// Token counter for the budget: tiktoken, heuristic
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff interval in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound of a single backoff interval in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Timeout of a single external call in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// System instruction sent with every completion
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// Label preceding the question in the user message
    #[serde(default = "default_question_label")]
    pub question_label: String,

    /// Label preceding the packed context in the user message
    #[serde(default = "default_context_label")]
    pub context_label: String,

    /// Placed in the context section when nothing was retrieved
    #[serde(default = "default_no_context_notice")]
    pub no_context_notice: String,

    /// Heading of the citations block appended to answers
    #[serde(default = "default_citations_header")]
    pub citations_header: String,

    /// Shown in place of an answer when the completion service failed
    #[serde(default = "default_unavailable_message")]
    pub unavailable_message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_message_chars() -> u64 { 4000 }
fn default_max_sessions() -> usize { 10_000 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_embedding_model() -> String { "text-embedding-ada-002".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_search_provider() -> String { "azure".to_string() }
fn default_search_api_version() -> String { "2023-11-01".to_string() }
fn default_vector_field() -> String { "contentVector".to_string() }
fn default_page_field() -> String { "page".to_string() }
fn default_title_field() -> String { "title".to_string() }
fn default_content_field() -> String { "content".to_string() }
fn default_locator_prefix() -> String { "Slide ".to_string() }
fn default_token_budget() -> usize { crate::DEFAULT_TOKEN_BUDGET }
fn default_top_k() -> usize { crate::DEFAULT_TOP_K }
fn default_request_deadline() -> u64 { 120 }
fn default_unmeasured_policy() -> String { "conservative".to_string() }
fn default_tokenizer() -> String { "tiktoken".to_string() }
fn default_max_retries() -> u32 { 1 }
fn default_initial_backoff() -> u64 { 250 }
fn default_max_backoff() -> u64 { 2000 }
fn default_call_timeout() -> u64 { 30 }
fn default_system_instruction() -> String { "You are a capable assistant AI.".to_string() }
fn default_question_label() -> String { "[Question]:".to_string() }
fn default_context_label() -> String { "[References]:".to_string() }
fn default_no_context_notice() -> String { "(no related references were found)".to_string() }
fn default_citations_header() -> String { "References:".to_string() }
fn default_unavailable_message() -> String { "Sorry, an answer could not be generated.".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "citewise".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

/// Legacy environment variable names and the keys they override.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "llm.api_key"),
    ("OPENAI_EMBEDDING_MODEL", "llm.embedding_model"),
    ("OPENAI_CHAT_COMPLETION_MODEL", "llm.chat_model"),
    ("AZURE_AI_SEARCH_ENDPOINT", "search.endpoint"),
    ("AZURE_AI_SEARCH_API_KEY", "search.api_key"),
    ("AZURE_AI_SEARCH_INDEX_NAME", "search.index_name"),
];

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__TOKEN_BUDGET=8192
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            );

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        builder.build()?.try_deserialize()
    }

    /// Check that every setting required by the selected providers is present.
    ///
    /// All problems are reported together so a misconfigured deployment
    /// fails once at startup instead of on the first question.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        match self.llm.provider.as_str() {
            "openai" => {
                if is_blank(&self.llm.api_key) {
                    missing.push("llm.api_key (OPENAI_API_KEY)");
                }
            }
            "mock" => {}
            other => {
                return Err(AppError::Configuration {
                    message: format!("Unknown llm provider '{}'", other),
                });
            }
        }

        match self.search.provider.as_str() {
            "azure" => {
                if is_blank(&self.search.endpoint) {
                    missing.push("search.endpoint (AZURE_AI_SEARCH_ENDPOINT)");
                }
                if is_blank(&self.search.api_key) {
                    missing.push("search.api_key (AZURE_AI_SEARCH_API_KEY)");
                }
                if is_blank(&self.search.index_name) {
                    missing.push("search.index_name (AZURE_AI_SEARCH_INDEX_NAME)");
                }
            }
            "memory" => {
                if is_blank(&self.search.documents_path) {
                    missing.push("search.documents_path");
                }
            }
            other => {
                return Err(AppError::Configuration {
                    message: format!("Unknown search provider '{}'", other),
                });
            }
        }

        if self.llm.chat_model.trim().is_empty() {
            missing.push("llm.chat_model (OPENAI_CHAT_COMPLETION_MODEL)");
        }
        if self.llm.embedding_model.trim().is_empty() {
            missing.push("llm.embedding_model (OPENAI_EMBEDDING_MODEL)");
        }

        if !missing.is_empty() {
            for key in &missing {
                tracing::error!(setting = %key, "Required setting is not configured");
            }
            return Err(AppError::Configuration {
                message: format!("missing settings: {}", missing.join(", ")),
            });
        }

        if self.pipeline.top_k == 0 {
            return Err(AppError::Configuration {
                message: "pipeline.top_k must be at least 1".to_string(),
            });
        }

        if !matches!(self.pipeline.unmeasured_policy.as_str(), "conservative" | "stop") {
            return Err(AppError::Configuration {
                message: format!(
                    "pipeline.unmeasured_policy must be 'conservative' or 'stop', got '{}'",
                    self.pipeline.unmeasured_policy
                ),
            });
        }

        if !matches!(self.pipeline.tokenizer.as_str(), "tiktoken" | "heuristic") {
            return Err(AppError::Configuration {
                message: format!(
                    "pipeline.tokenizer must be 'tiktoken' or 'heuristic', got '{}'",
                    self.pipeline.tokenizer
                ),
            });
        }

        tracing::debug!(
            llm_provider = %self.llm.provider,
            search_provider = %self.search.provider,
            "Configuration validated"
        );
        Ok(())
    }

    /// Whole-question deadline, if enabled
    pub fn request_deadline(&self) -> Option<Duration> {
        match self.pipeline.request_deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_message_chars: default_max_message_chars(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: default_api_base(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            temperature: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            endpoint: None,
            api_key: None,
            index_name: None,
            api_version: default_search_api_version(),
            vector_field: default_vector_field(),
            page_field: default_page_field(),
            title_field: default_title_field(),
            content_field: default_content_field(),
            locator_prefix: default_locator_prefix(),
            documents_path: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            top_k: default_top_k(),
            request_deadline_secs: default_request_deadline(),
            unmeasured_policy: default_unmeasured_policy(),
            tokenizer: default_tokenizer(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_instruction: default_system_instruction(),
            question_label: default_question_label(),
            context_label: default_context_label(),
            no_context_notice: default_no_context_notice(),
            citations_header: default_citations_header(),
            unavailable_message: default_unavailable_message(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            prompt: PromptConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".to_string();
        config.search.provider = "memory".to_string();
        config.search.documents_path = Some("docs.jsonl".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.token_budget, 4096);
        assert_eq!(config.pipeline.top_k, 5);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.search.vector_field, "contentVector");
    }

    #[test]
    fn test_validate_reports_all_missing_azure_settings() {
        let config = AppConfig::default();
        let err = config.validate().unwrap_err();
        let message = err.to_string();

        assert!(message.contains("OPENAI_API_KEY"));
        assert!(message.contains("AZURE_AI_SEARCH_ENDPOINT"));
        assert!(message.contains("AZURE_AI_SEARCH_API_KEY"));
        assert!(message.contains("AZURE_AI_SEARCH_INDEX_NAME"));
    }

    #[test]
    fn test_validate_offline_config() {
        assert!(offline_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_values() {
        let mut config = offline_config();
        config.search.documents_path = Some("   ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_policy() {
        let mut config = offline_config();
        config.pipeline.unmeasured_policy = "optimistic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_tokenizer() {
        let mut config = offline_config();
        config.pipeline.tokenizer = "words".to_string();
        assert!(config.validate().is_err());

        config.pipeline.tokenizer = "heuristic".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_legacy_env_overrides() {
        std::env::set_var("AZURE_AI_SEARCH_INDEX_NAME", "slides-from-env");
        std::env::set_var("OPENAI_CHAT_COMPLETION_MODEL", "gpt-4o");

        let config = AppConfig::load();

        std::env::remove_var("AZURE_AI_SEARCH_INDEX_NAME");
        std::env::remove_var("OPENAI_CHAT_COMPLETION_MODEL");

        let config = config.unwrap();
        assert_eq!(config.search.index_name.as_deref(), Some("slides-from-env"));
        assert_eq!(config.llm.chat_model, "gpt-4o");
        assert_eq!(config.llm.embedding_model, "text-embedding-ada-002");
    }

    #[test]
    fn test_request_deadline_zero_disables() {
        let mut config = AppConfig::default();
        assert_eq!(config.request_deadline(), Some(Duration::from_secs(120)));

        config.pipeline.request_deadline_secs = 0;
        assert_eq!(config.request_deadline(), None);
    }
}
