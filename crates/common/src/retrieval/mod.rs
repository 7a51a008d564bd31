//! Query embedding and candidate retrieval
//!
//! The retriever embeds the question, runs one hybrid search with the text
//! and the vector, and returns candidates re-ranked `0..n` in backend order.
//! [`Retriever::retrieve`] never fails: embedding or search errors are
//! logged and turned into an empty candidate list with the reason attached,
//! which downstream stages treat like "nothing relevant found".

use crate::embeddings::{check_dimension, Embedder};
use crate::errors::{AppError, FailureReason, Result};
use crate::metrics;
use crate::resilience::{call_external, RequestScope, RetryPolicy};
use crate::search::{Candidate, SearchBackend};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Candidates for one question, plus the failure that emptied them if any
#[derive(Debug, Clone, Default, Serialize)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    pub failure: Option<FailureReason>,
}

impl Retrieval {
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn SearchBackend>,
    top_k: usize,
    policy: RetryPolicy,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, search: Arc<dyn SearchBackend>, top_k: usize) -> Self {
        Self {
            embedder,
            search,
            top_k: top_k.max(1),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `text`, rejecting vectors of the wrong dimension.
    ///
    /// Every failure is reported as an `EmbeddingError`.
    pub async fn embed(&self, text: &str, scope: &RequestScope) -> Result<Vec<f32>> {
        let start = Instant::now();
        let model = self.embedder.model_name();

        let result = call_external("embedding", &self.policy, scope, || self.embedder.embed(text))
            .await
            .and_then(|vector| check_dimension(vector, self.embedder.dimension()))
            .map_err(AppError::into_embedding_error);

        metrics::record_embedding(start.elapsed().as_secs_f64(), model, result.is_ok());
        result
    }

    /// Hybrid search with `top_k` results, ranks renumbered from 0.
    ///
    /// Every failure is reported as a `SearchError`.
    pub async fn search(&self, query: &str, vector: &[f32], scope: &RequestScope) -> Result<Vec<Candidate>> {
        let start = Instant::now();
        let backend = self.search.name();

        let result = call_external("search", &self.policy, scope, || {
            self.search.search(query, vector, self.top_k)
        })
        .await
        .map(|mut candidates| {
            candidates.truncate(self.top_k);
            for (rank, candidate) in candidates.iter_mut().enumerate() {
                candidate.rank = rank;
            }
            candidates
        })
        .map_err(AppError::into_search_error);

        let count = result.as_ref().map(Vec::len).unwrap_or(0);
        metrics::record_search(start.elapsed().as_secs_f64(), backend, count, result.is_ok());
        result
    }

    /// Embed then search, propagating the first failure.
    pub async fn try_retrieve(&self, query: &str, scope: &RequestScope) -> Result<Vec<Candidate>> {
        let vector = self.embed(query, scope).await?;
        self.search(query, &vector, scope).await
    }

    /// Embed then search; failures yield an empty, degraded retrieval.
    pub async fn retrieve(&self, query: &str, scope: &RequestScope) -> Retrieval {
        match self.try_retrieve(query, scope).await {
            Ok(candidates) => {
                tracing::info!(candidates = candidates.len(), "Retrieved candidates");
                Retrieval { candidates, failure: None }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    code = ?e.code(),
                    "Retrieval failed, continuing without references"
                );
                Retrieval {
                    candidates: Vec::new(),
                    failure: Some(FailureReason::from(&e)),
                }
            }
        }
    }
}
