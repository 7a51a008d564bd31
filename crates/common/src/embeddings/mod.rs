//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible `/embeddings` endpoints (text-embedding-ada-002, text-embedding-3-*)
//! - A deterministic mock for tests and offline runs
//!
//! Clients make a single attempt per call. Timeouts and retries are applied
//! by the caller through [`crate::resilience`].

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        model: String,
        dimension: usize,
        base_url: String,
    ) -> Self {
        Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: vec![text],
            model: &self.model,
        };

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                service: "embedding".to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        let embedding = result.data.into_iter().next().map(|e| e.embedding).ok_or_else(|| {
            AppError::EmbeddingError {
                message: "Empty response".to_string(),
            }
        })?;

        check_dimension(embedding, self.dimension)
    }
}

/// Reject vectors whose length differs from the configured dimension.
pub fn check_dimension(embedding: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if embedding.len() != expected {
        return Err(AppError::EmbeddingError {
            message: format!(
                "expected {} dimensions, got {}",
                expected,
                embedding.len()
            ),
        });
    }
    Ok(embedding)
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.make_request(text).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
///
/// Vectors are derived from the text's bytes, so equal texts embed equally
/// and the in-memory index gives stable rankings.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return Ok(vector);
        }
        for word in text.split_whitespace() {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % self.dimension] += 1.0;
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &LlmConfig, client: reqwest::Client) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "OpenAI API key required".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(
                client,
                key,
                config.embedding_model.clone(),
                config.embedding_dimension,
                config.api_base.clone(),
            )))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(config.embedding_dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);
        assert_eq!(embedding.iter().sum::<f32>(), 2.0);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("Slide about rust").await.unwrap();
        let b = embedder.embed("slide ABOUT Rust").await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_check() {
        assert!(check_dimension(vec![0.0; 3], 3).is_ok());
        let err = check_dimension(vec![0.0; 2], 3).unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_create_embedder_requires_key() {
        let config = LlmConfig::default();
        assert!(create_embedder(&config, reqwest::Client::new()).is_err());

        let config = LlmConfig { provider: "mock".to_string(), ..LlmConfig::default() };
        let embedder = create_embedder(&config, reqwest::Client::new()).unwrap();
        assert_eq!(embedder.dimension(), 1536);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retryable() {
        let embedder = OpenAIEmbedder::new(
            reqwest::Client::new(),
            "key".to_string(),
            "text-embedding-ada-002".to_string(),
            1536,
            "http://127.0.0.1:9".to_string(),
        );
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::HttpClient(_)));
        assert!(err.is_retryable());
    }
}
