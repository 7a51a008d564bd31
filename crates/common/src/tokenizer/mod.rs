//! Token counting for context budgets
//!
//! The packer measures context with the tokenizer of the chat model that will
//! receive it. Counting never fails its caller: a model without a known
//! encoding yields [`TokenMeasure::Unmeasured`], which `count_tokens` reports
//! as `0`. A zero from [`TokenCounter::count_tokens`] therefore means
//! "unknown", and budget checks should use [`TokenCounter::measure`].

use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Outcome of measuring a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMeasure {
    /// Counted with the model's own tokenizer
    Exact(usize),
    /// The tokenizer was unavailable or failed
    Unmeasured,
}

impl TokenMeasure {
    pub fn exact(self) -> Option<usize> {
        match self {
            TokenMeasure::Exact(n) => Some(n),
            TokenMeasure::Unmeasured => None,
        }
    }
}

/// Counts tokens for a given model.
pub trait TokenCounter: Send + Sync {
    /// Count tokens, reporting why counting was impossible.
    fn try_count(&self, model: &str, text: &str) -> Result<usize>;

    /// Count tokens, turning failures into [`TokenMeasure::Unmeasured`].
    fn measure(&self, model: &str, text: &str) -> TokenMeasure {
        match self.try_count(model, text) {
            Ok(count) => TokenMeasure::Exact(count),
            Err(e) => {
                tracing::warn!(model = model, error = %e, "Token count unavailable");
                crate::metrics::record_tokenizer_failure(model);
                TokenMeasure::Unmeasured
            }
        }
    }

    /// Count tokens, returning `0` when the count is unavailable.
    fn count_tokens(&self, model: &str, text: &str) -> usize {
        match self.measure(model, text) {
            TokenMeasure::Exact(count) => count,
            TokenMeasure::Unmeasured => 0,
        }
    }
}

/// BPE tokenizers resolved once per configured model.
pub struct TokenizerAdapter {
    encoders: HashMap<String, CoreBPE>,
}

impl TokenizerAdapter {
    /// Resolve an encoding for each model.
    ///
    /// Models tiktoken does not know are logged and left out; counting for them
    /// later reports a `TokenizationError`.
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut encoders = HashMap::new();

        for model in models {
            let model = model.as_ref();
            if encoders.contains_key(model) {
                continue;
            }
            match tiktoken_rs::get_bpe_from_model(model) {
                Ok(bpe) => {
                    tracing::debug!(model = model, "Tokenizer loaded");
                    encoders.insert(model.to_string(), bpe);
                }
                Err(e) => {
                    tracing::warn!(model = model, error = %e, "No tokenizer for model");
                }
            }
        }

        Self { encoders }
    }

    /// Whether an encoding was resolved for `model`.
    pub fn supports(&self, model: &str) -> bool {
        self.encoders.contains_key(model)
    }
}

impl TokenCounter for TokenizerAdapter {
    fn try_count(&self, model: &str, text: &str) -> Result<usize> {
        let bpe = self.encoders.get(model).ok_or_else(|| AppError::TokenizationError {
            model: model.to_string(),
            message: "no tokenizer registered for model".to_string(),
        })?;

        Ok(bpe.encode_with_special_tokens(text).len())
    }
}

/// Byte-length approximation (~4 bytes per token) for offline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn try_count(&self, _model: &str, text: &str) -> Result<usize> {
        Ok(text.len().div_ceil(4))
    }
}

/// Create the token counter named by `pipeline.tokenizer`
pub fn create_token_counter(kind: &str, chat_model: &str) -> Result<Arc<dyn TokenCounter>> {
    match kind {
        "tiktoken" => {
            let adapter = TokenizerAdapter::new([chat_model]);
            if !adapter.supports(chat_model) {
                tracing::warn!(
                    model = %chat_model,
                    "No tokenizer for chat model, context size will not be measured exactly"
                );
            }
            Ok(Arc::new(adapter))
        }
        "heuristic" => Ok(Arc::new(HeuristicCounter)),
        other => Err(AppError::Configuration {
            message: format!("Unknown tokenizer '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_known_model() {
        let adapter = TokenizerAdapter::new(["gpt-4"]);
        assert!(adapter.supports("gpt-4"));
        assert_eq!(adapter.count_tokens("gpt-4", "hello world"), 2);
        assert_eq!(adapter.measure("gpt-4", ""), TokenMeasure::Exact(0));
    }

    #[test]
    fn test_unknown_model_is_unmeasured() {
        let adapter = TokenizerAdapter::new(["definitely-not-a-model"]);
        assert!(!adapter.supports("definitely-not-a-model"));
        assert_eq!(
            adapter.measure("definitely-not-a-model", "hello"),
            TokenMeasure::Unmeasured
        );
        assert_eq!(adapter.count_tokens("definitely-not-a-model", "hello"), 0);
    }

    #[test]
    fn test_unregistered_model_is_an_error() {
        let adapter = TokenizerAdapter::new(["gpt-4"]);
        let err = adapter.try_count("gpt-4o", "hello").unwrap_err();
        assert!(matches!(err, AppError::TokenizationError { .. }));
    }

    #[test]
    fn test_heuristic_counter() {
        let counter = HeuristicCounter;
        assert_eq!(counter.count_tokens("any", ""), 0);
        assert_eq!(counter.count_tokens("any", "abcd"), 1);
        assert_eq!(counter.count_tokens("any", "abcde"), 2);
    }

    #[test]
    fn test_create_token_counter() {
        let exact = create_token_counter("tiktoken", "gpt-4").unwrap();
        assert_eq!(exact.measure("gpt-4", "hello world"), TokenMeasure::Exact(2));

        let heuristic = create_token_counter("heuristic", "gpt-4").unwrap();
        assert_eq!(heuristic.measure("gpt-4", "hello world"), TokenMeasure::Exact(3));

        assert!(matches!(
            create_token_counter("words", "gpt-4"),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_measure_exact_accessor() {
        assert_eq!(TokenMeasure::Exact(7).exact(), Some(7));
        assert_eq!(TokenMeasure::Unmeasured.exact(), None);
    }
}
