//! Reciprocal Rank Fusion (RRF) for combining search results
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization
//! - Works well with different scoring distributions
//! - Is robust to outliers

use std::collections::BTreeMap;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f32,

    /// Weight for vector results
    pub vector_weight: f32,

    /// Weight for lexical (BM25) results
    pub lexical_weight: f32,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 0.6,
            lexical_weight: 0.4,
        }
    }
}

/// One document after fusion
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    /// Document position in the index
    pub doc: usize,
    pub vector_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
    /// Normalized to 0-1 against the best hit
    pub score: f32,
}

impl RRFusion {
    /// Create with custom weights
    pub fn with_weights(vector_weight: f32, lexical_weight: f32) -> Self {
        Self {
            k: 60.0,
            vector_weight,
            lexical_weight,
        }
    }

    /// Fuse two rankings of document ids, best first.
    ///
    /// Ties are broken by document id so equal inputs always fuse equally.
    pub fn fuse(&self, vector_ranked: &[usize], lexical_ranked: &[usize], limit: usize) -> Vec<FusedHit> {
        let mut ranks: BTreeMap<usize, (Option<usize>, Option<usize>)> = BTreeMap::new();

        for (rank, &doc) in vector_ranked.iter().enumerate() {
            ranks.entry(doc).or_default().0.get_or_insert(rank + 1);
        }

        for (rank, &doc) in lexical_ranked.iter().enumerate() {
            ranks.entry(doc).or_default().1.get_or_insert(rank + 1);
        }

        let mut results: Vec<FusedHit> = ranks
            .into_iter()
            .map(|(doc, (vector_rank, lexical_rank))| {
                let vector_rrf = vector_rank
                    .map(|r| self.vector_weight / (self.k + r as f32))
                    .unwrap_or(0.0);

                let lexical_rrf = lexical_rank
                    .map(|r| self.lexical_weight / (self.k + r as f32))
                    .unwrap_or(0.0);

                FusedHit {
                    doc,
                    vector_rank,
                    lexical_rank,
                    score: vector_rrf + lexical_rrf,
                }
            })
            .collect();

        // Sort by RRF score descending
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.cmp(&b.doc))
        });

        results.truncate(limit);

        if let Some(max_score) = results.first().map(|r| r.score) {
            if max_score > 0.0 {
                for result in &mut results {
                    result.score /= max_score;
                }
            }
        }

        results
    }
}
