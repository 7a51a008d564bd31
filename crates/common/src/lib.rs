//! Citewise Common Library
//!
//! Retrieval-augmented answering shared by Citewise services:
//! - Token counting tied to the chat model's tokenizer
//! - Embedding, search and chat completion clients behind narrow traits
//! - Retrieval, token-bounded context packing and answer composition
//! - Timeouts, bounded retries and request deadlines for external calls
//! - Sessions with plain-text transcripts
//! - Error types, configuration, metrics and observability

pub mod completion;
pub mod composer;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod resilience;
pub mod retrieval;
pub mod search;
pub mod session;
pub mod tokenizer;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use composer::AnswerOutcome;
pub use embeddings::Embedder;
pub use pipeline::{PipelineReport, RagPipeline};
pub use session::Session;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default token budget for packed context
pub const DEFAULT_TOKEN_BUDGET: usize = 4096;

/// Default number of candidates requested from search
pub const DEFAULT_TOP_K: usize = 5;
