//! Answer Composer - Prompt formatting and grounded answers
//!
//! Builds a two-message prompt (system instruction, then question plus
//! references), runs one completion through the resilience layer and appends
//! the citation block to the reply. A failed completion yields
//! [`AnswerOutcome::Unavailable`], never an empty answer.

use crate::completion::{ChatMessage, Completer};
use crate::config::PromptConfig;
use crate::context::Citation;
use crate::errors::FailureReason;
use crate::metrics;
use crate::resilience::{call_external, RequestScope, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Prompt and answer wording
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system_instruction: String,
    pub question_label: String,
    pub context_label: String,
    pub no_context_notice: String,
    pub citations_header: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}

impl PromptTemplate {
    pub fn from_config(config: &PromptConfig) -> Self {
        Self {
            system_instruction: config.system_instruction.clone(),
            question_label: config.question_label.clone(),
            context_label: config.context_label.clone(),
            no_context_notice: config.no_context_notice.clone(),
            citations_header: config.citations_header.clone(),
        }
    }

    /// `"{question_label}{question}\n{context_label}{context}"`
    pub fn user_message(&self, question: &str, context: &str) -> String {
        let context = if context.is_empty() { self.no_context_notice.as_str() } else { context };
        format!(
            "{}{}\n{}{}",
            self.question_label, question, self.context_label, context
        )
    }

    pub fn messages(&self, question: &str, context: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_instruction.clone()),
            ChatMessage::user(self.user_message(question, context)),
        ]
    }

    /// Append the citations block; a reply without citations is returned as-is.
    pub fn render_answer(&self, reply: &str, citations: &[Citation]) -> String {
        if citations.is_empty() {
            return reply.to_string();
        }

        let lines: String = citations.iter().map(|c| format!("{}\n", c)).collect();
        format!("{} \n\n\n{}\n{}", reply, self.citations_header, lines)
    }
}

/// A completed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedAnswer {
    /// Reply with the citations block appended
    pub text: String,
    /// Reply exactly as returned by the model
    pub reply: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered(ComposedAnswer),
    Unavailable(FailureReason),
}

impl AnswerOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, AnswerOutcome::Answered(_))
    }

    /// Final answer text, absent when no answer could be produced
    pub fn text(&self) -> Option<&str> {
        match self {
            AnswerOutcome::Answered(answer) => Some(&answer.text),
            AnswerOutcome::Unavailable(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnswerOutcome::Answered(_) => "answered",
            AnswerOutcome::Unavailable(_) => "unavailable",
        }
    }
}

pub struct AnswerComposer {
    completer: Arc<dyn Completer>,
    template: PromptTemplate,
    policy: RetryPolicy,
}

impl AnswerComposer {
    pub fn new(completer: Arc<dyn Completer>, template: PromptTemplate) -> Self {
        Self {
            completer,
            template,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn model_name(&self) -> &str {
        self.completer.model_name()
    }

    /// Ask the model and attach citations to its reply.
    pub async fn compose(
        &self,
        question: &str,
        context: &str,
        citations: &[Citation],
        scope: &RequestScope,
    ) -> AnswerOutcome {
        let messages = self.template.messages(question, context);
        let model = self.completer.model_name();
        let start = Instant::now();

        let result = call_external("completion", &self.policy, scope, || {
            self.completer.complete(&messages)
        })
        .await;

        metrics::record_completion(start.elapsed().as_secs_f64(), model, result.is_ok());

        match result {
            Ok(reply) => {
                tracing::info!(
                    model = model,
                    citations = citations.len(),
                    reply_chars = reply.chars().count(),
                    "Answer composed"
                );
                AnswerOutcome::Answered(ComposedAnswer {
                    text: self.template.render_answer(&reply, citations),
                    reply,
                    citations: citations.to_vec(),
                })
            }
            Err(e) => {
                let e = e.into_completion_error();
                tracing::error!(model = model, error = %e, "Completion failed, no answer available");
                AnswerOutcome::Unavailable(FailureReason::from(&e))
            }
        }
    }
}
