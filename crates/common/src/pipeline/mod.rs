//! Question answering pipeline
//!
//! One question runs strictly in sequence: retrieve (embed + search), pack
//! the candidates under the token budget, then compose the answer. All
//! external calls share one [`RequestScope`], so the request deadline bounds
//! the whole exchange. The pipeline holds no per-request state and can serve
//! concurrent questions from one shared instance.

use crate::completion::create_completer;
use crate::composer::{AnswerComposer, AnswerOutcome, PromptTemplate};
use crate::config::AppConfig;
use crate::context::{ContextPacker, PackedContext, UnmeasuredPolicy};
use crate::embeddings::create_embedder;
use crate::errors::{AppError, FailureReason, Result};
use crate::resilience::{RequestScope, RetryPolicy};
use crate::retrieval::Retriever;
use crate::search::create_search_backend;
use crate::session::Session;
use crate::tokenizer::create_token_counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything produced while answering one question
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub question: String,
    pub outcome: AnswerOutcome,
    pub packed: PackedContext,
    /// Set when retrieval failed and the answer was composed without references
    pub retrieval_failure: Option<FailureReason>,
    pub elapsed_ms: u64,
}

pub struct RagPipeline {
    retriever: Retriever,
    packer: ContextPacker,
    composer: AnswerComposer,
    chat_model: String,
    token_budget: usize,
    request_deadline: Option<Duration>,
}

impl RagPipeline {
    pub fn new(
        retriever: Retriever,
        packer: ContextPacker,
        composer: AnswerComposer,
        chat_model: impl Into<String>,
        token_budget: usize,
    ) -> Self {
        Self {
            retriever,
            packer,
            composer,
            chat_model: chat_model.into(),
            token_budget,
            request_deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.request_deadline = deadline;
        self
    }

    /// Build the pipeline and its clients from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.retry.call_timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let policy = RetryPolicy::from_config(&config.retry);
        let unmeasured: UnmeasuredPolicy = config
            .pipeline
            .unmeasured_policy
            .parse()
            .map_err(|message| AppError::Configuration { message })?;

        let embedder = create_embedder(&config.llm, client.clone())?;
        let search = create_search_backend(&config.search, client.clone())?;
        let completer = create_completer(&config.llm, client)?;

        let counter = create_token_counter(&config.pipeline.tokenizer, &config.llm.chat_model)?;

        let retriever = Retriever::new(embedder, search, config.pipeline.top_k)
            .with_policy(policy.clone());
        let packer = ContextPacker::new(counter).with_policy(unmeasured);
        let composer = AnswerComposer::new(completer, PromptTemplate::from_config(&config.prompt))
            .with_policy(policy);

        tracing::info!(
            chat_model = %config.llm.chat_model,
            embedding_model = %config.llm.embedding_model,
            search = %config.search.provider,
            tokenizer = %config.pipeline.tokenizer,
            token_budget = config.pipeline.token_budget,
            top_k = config.pipeline.top_k,
            "Pipeline ready"
        );

        Ok(Self::new(
            retriever,
            packer,
            composer,
            config.llm.chat_model.clone(),
            config.pipeline.token_budget,
        )
        .with_deadline(config.request_deadline()))
    }

    /// A fresh scope carrying the configured request deadline
    pub fn scope(&self) -> RequestScope {
        match self.request_deadline {
            Some(deadline) => RequestScope::with_timeout(deadline),
            None => RequestScope::unbounded(),
        }
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub async fn answer(&self, question: &str) -> PipelineReport {
        self.answer_within(question, &self.scope()).await
    }

    #[tracing::instrument(skip(self, question, scope), fields(question_chars = question.chars().count()))]
    pub async fn answer_within(&self, question: &str, scope: &RequestScope) -> PipelineReport {
        let start = Instant::now();

        let retrieval = self.retriever.retrieve(question, scope).await;
        let packed = self.packer.pack(&retrieval.candidates, &self.chat_model, self.token_budget);
        let outcome = self
            .composer
            .compose(question, &packed.text, &packed.citations, scope)
            .await;

        let elapsed = start.elapsed();
        crate::metrics::record_answer(outcome.label(), elapsed.as_secs_f64());

        tracing::info!(
            outcome = outcome.label(),
            candidates = retrieval.candidates.len(),
            included = packed.included(),
            tokens = packed.token_count,
            degraded = retrieval.is_degraded(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Question processed"
        );

        PipelineReport {
            question: question.to_string(),
            outcome,
            packed,
            retrieval_failure: retrieval.failure,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Answer and record the turn in `session`
    pub async fn ask(&self, session: &mut Session, question: &str) -> PipelineReport {
        let report = self.answer(question).await;
        session.record(question, &report.outcome);
        report
    }
}
