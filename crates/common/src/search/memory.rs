//! In-memory hybrid index
//!
//! Loads passages from a JSONL file (one `{page, title, content, vector?}`
//! object per line), ranks them with BM25 over title and content plus cosine
//! similarity over stored vectors, and fuses both rankings with weighted RRF.
//! Documents without a vector take part in the lexical ranking only.

use super::{locator, Candidate, RRFusion, SearchBackend};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// BM25 term saturation
const K1: f32 = 1.2;
/// BM25 length normalization
const B: f32 = 0.75;

/// One line of the documents file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default)]
    pub page: serde_json::Value,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

struct Entry {
    doc: IndexDocument,
    locator: String,
    term_freqs: HashMap<String, u32>,
    length: usize,
}

pub struct MemoryIndex {
    entries: Vec<Entry>,
    doc_freqs: HashMap<String, usize>,
    avg_length: f32,
    fusion: RRFusion,
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

impl MemoryIndex {
    pub fn from_documents(documents: Vec<IndexDocument>, locator_prefix: &str) -> Self {
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;

        let entries: Vec<Entry> = documents
            .into_iter()
            .map(|doc| {
                let mut term_freqs: HashMap<String, u32> = HashMap::new();
                let mut length = 0;
                for term in terms(&doc.title).chain(terms(&doc.content)) {
                    *term_freqs.entry(term).or_default() += 1;
                    length += 1;
                }
                for term in term_freqs.keys() {
                    *doc_freqs.entry(term.clone()).or_default() += 1;
                }
                total_length += length;

                Entry {
                    locator: locator(locator_prefix, &doc.page),
                    doc,
                    term_freqs,
                    length,
                }
            })
            .collect();

        let avg_length = if entries.is_empty() {
            0.0
        } else {
            total_length as f32 / entries.len() as f32
        };

        Self {
            entries,
            doc_freqs,
            avg_length,
            fusion: RRFusion::default(),
        }
    }

    /// Load documents from a JSONL file; blank lines are skipped.
    pub fn from_jsonl(path: impl AsRef<Path>, locator_prefix: &str) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| AppError::Configuration {
            message: format!("cannot read documents file {}: {}", path.display(), e),
        })?;

        let documents = Self::parse_jsonl(&raw)?;

        tracing::info!(
            path = %path.display(),
            documents = documents.len(),
            "In-memory index loaded"
        );

        Ok(Self::from_documents(documents, locator_prefix))
    }

    fn parse_jsonl(raw: &str) -> Result<Vec<IndexDocument>> {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| AppError::Configuration {
                    message: format!("invalid document on line {}: {}", n + 1, e),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bm25(&self, entry: &Entry, query_terms: &[String]) -> f32 {
        let n = self.entries.len() as f32;
        query_terms
            .iter()
            .filter_map(|term| {
                let tf = *entry.term_freqs.get(term)? as f32;
                let df = *self.doc_freqs.get(term)? as f32;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let norm = 1.0 - B + B * entry.length as f32 / self.avg_length.max(1.0);
                Some(idf * tf * (K1 + 1.0) / (tf + K1 * norm))
            })
            .sum()
    }

    fn lexical_ranking(&self, query: &str) -> Vec<usize> {
        let mut query_terms: Vec<String> = terms(query).collect();
        query_terms.sort();
        query_terms.dedup();

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, self.bm25(entry, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(i, _)| i).collect()
    }

    fn vector_ranking(&self, vector: &[f32]) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let similarity = cosine(entry.doc.vector.as_deref()?, vector)?;
                (similarity > 0.0).then_some((i, similarity))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(i, _)| i).collect()
    }
}

#[async_trait]
impl SearchBackend for MemoryIndex {
    async fn search(&self, query: &str, vector: &[f32], top_k: usize) -> Result<Vec<Candidate>> {
        // k nearest by vector, as the remote backend does
        let mut vector_ranked = self.vector_ranking(vector);
        vector_ranked.truncate(top_k);
        let lexical_ranked = self.lexical_ranking(query);

        let hits = self.fusion.fuse(&vector_ranked, &lexical_ranked, top_k);

        tracing::debug!(
            vector_hits = vector_ranked.len(),
            lexical_hits = lexical_ranked.len(),
            fused = hits.len(),
            "Memory index query completed"
        );

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| {
                let entry = &self.entries[hit.doc];
                Candidate {
                    rank,
                    title: entry.doc.title.clone(),
                    body: entry.doc.content.clone(),
                    locator: entry.locator.clone(),
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
