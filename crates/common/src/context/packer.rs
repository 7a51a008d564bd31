//! Context Packer - Token-bounded greedy prefix selection
//!
//! Candidates are appended in rank order as
//! `"[i] subject: {title}, contents: {body}\n"`. After each tentative append
//! the whole accumulated context is measured with the chat model's tokenizer;
//! the first candidate that would push it over the budget ends packing, even
//! if a later candidate would fit on its own.

use crate::search::Candidate;
use crate::tokenizer::{TokenCounter, TokenMeasure};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Reference to one packed candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Bracket index used in the context text
    pub index: usize,
    /// Rank of the candidate in the search results
    pub rank: usize,
    pub locator: String,
    pub title: String,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}「{}」", self.locator, self.title)
    }
}

/// Result of one packing pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackedContext {
    /// Concatenated formatted entries
    pub text: String,
    /// One per included candidate, in inclusion order
    pub citations: Vec<Citation>,
    /// Token count of `text`
    pub token_count: usize,
    /// Whether any measurement fell back to the byte-length estimate
    pub estimated: bool,
    /// Candidates examined, including the one that stopped packing
    pub considered: usize,
}

impl PackedContext {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    pub fn included(&self) -> usize {
        self.citations.len()
    }

    /// Citation display lines, each terminated by a newline
    pub fn citation_lines(&self) -> String {
        self.citations.iter().map(|c| format!("{}\n", c)).collect()
    }
}

/// What to do when the tokenizer cannot measure the tentative context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmeasuredPolicy {
    /// Use the UTF-8 byte length, an upper bound for byte-level BPE
    #[default]
    Conservative,
    /// Stop packing at the unmeasurable candidate
    Stop,
}

impl FromStr for UnmeasuredPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown unmeasured policy '{}'", other)),
        }
    }
}

/// Format one context entry
pub fn format_entry(index: usize, candidate: &Candidate) -> String {
    format!(
        "[{}] subject: {}, contents: {}\n",
        index, candidate.title, candidate.body
    )
}

pub struct ContextPacker {
    counter: Arc<dyn TokenCounter>,
    policy: UnmeasuredPolicy,
}

impl ContextPacker {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            policy: UnmeasuredPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UnmeasuredPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pack the longest prefix of `candidates` whose formatted context fits `budget`.
    pub fn pack(&self, candidates: &[Candidate], model: &str, budget: usize) -> PackedContext {
        let mut packed = PackedContext::default();

        for (index, candidate) in candidates.iter().enumerate() {
            packed.considered += 1;

            let mut tentative = packed.text.clone();
            tentative.push_str(&format_entry(index, candidate));

            let count = match self.counter.measure(model, &tentative) {
                TokenMeasure::Exact(count) => count,
                TokenMeasure::Unmeasured => match self.policy {
                    UnmeasuredPolicy::Conservative => {
                        packed.estimated = true;
                        tentative.len()
                    }
                    UnmeasuredPolicy::Stop => {
                        tracing::warn!(
                            index = index,
                            model = model,
                            "Token count unavailable, packing stopped"
                        );
                        break;
                    }
                },
            };

            if count > budget {
                tracing::info!(
                    index = index,
                    tokens = count,
                    budget = budget,
                    "Token budget reached"
                );
                break;
            }

            tracing::debug!(index = index, tokens = count, title = %candidate.title, "Candidate packed");

            packed.text = tentative;
            packed.token_count = count;
            packed.citations.push(Citation {
                index,
                rank: candidate.rank,
                locator: candidate.locator.clone(),
                title: candidate.title.clone(),
            });
        }

        tracing::debug!(
            included = packed.included(),
            considered = packed.considered,
            tokens = packed.token_count,
            estimated = packed.estimated,
            "Context packed"
        );
        crate::metrics::record_packing(
            packed.considered,
            packed.included(),
            packed.token_count,
            packed.estimated,
        );

        packed
    }
}
