//! Search backends returning ranked candidate passages
//!
//! Backends run a hybrid (lexical + vector) query and return candidates in
//! descending relevance. Available backends:
//! - [`AzureSearch`]: Azure AI Search REST API
//! - [`MemoryIndex`]: in-process BM25 + cosine index loaded from JSONL
//! - [`StaticSearch`]: fixed results, for tests

mod azure;
mod fusion;
mod memory;

pub use azure::AzureSearch;
pub use fusion::{FusedHit, RRFusion};
pub use memory::{IndexDocument, MemoryIndex};

use crate::config::SearchConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// 0-based position in the backend's ranking
    pub rank: usize,
    pub title: String,
    pub body: String,
    /// Human-readable source reference, e.g. "Slide 12"
    pub locator: String,
}

impl Candidate {
    pub fn new(
        rank: usize,
        title: impl Into<String>,
        body: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            rank,
            title: title.into(),
            body: body.into(),
            locator: locator.into(),
        }
    }
}

/// Hybrid search over an index of passages
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Return at most `top_k` candidates, most relevant first.
    async fn search(&self, query: &str, vector: &[f32], top_k: usize) -> Result<Vec<Candidate>>;

    /// Backend name for logs and metrics
    fn name(&self) -> &str;
}

/// Build a locator from a page field value.
///
/// Strings are used as-is, numbers are printed, anything else is empty.
pub fn locator(prefix: &str, page: &serde_json::Value) -> String {
    match page {
        serde_json::Value::String(s) => format!("{}{}", prefix, s),
        serde_json::Value::Number(n) => format!("{}{}", prefix, n),
        serde_json::Value::Null => prefix.trim_end().to_string(),
        other => format!("{}{}", prefix, other),
    }
}

/// Fixed search results
pub struct StaticSearch {
    candidates: Vec<Candidate>,
    failure: Option<String>,
}

impl StaticSearch {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates, failure: None }
    }

    /// A backend whose every query fails with a `SearchError`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { candidates: Vec::new(), failure: Some(message.into()) }
    }
}

#[async_trait]
impl SearchBackend for StaticSearch {
    async fn search(&self, _query: &str, _vector: &[f32], top_k: usize) -> Result<Vec<Candidate>> {
        if let Some(message) = &self.failure {
            return Err(AppError::SearchError { message: message.clone() });
        }
        Ok(self.candidates.iter().take(top_k).cloned().collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Create a search backend based on configuration
pub fn create_search_backend(
    config: &SearchConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn SearchBackend>> {
    match config.provider.as_str() {
        "azure" => Ok(Arc::new(AzureSearch::from_config(config, client)?)),
        "memory" => {
            let path = config.documents_path.as_deref().ok_or_else(|| AppError::Configuration {
                message: "search.documents_path is required for the memory index".to_string(),
            })?;
            Ok(Arc::new(MemoryIndex::from_jsonl(path, &config.locator_prefix)?))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown search provider '{}'", other),
        }),
    }
}
