//! Reciprocal Rank Fusion (RRF) for combining search results
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization
//! - Works well with different scoring distributions
//! - Is robust to outliers
//!
//! Each list contributes `weight / (k + rank + 1)` for a 0-based `rank`, with
//! `alpha` weighting the semantic list and `1 - alpha` the keyword list.

use super::{FusedItem, RetrievalMode, RetrievedItem, ScoreBreakdown};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Default RRF constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Default semantic weight
pub const DEFAULT_ALPHA: f64 = 0.5;

/// RRF fusion parameters
#[derive(Debug, Clone, Copy)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f64,

    /// Weight of the semantic list, in [0, 1]
    pub alpha: f64,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            alpha: DEFAULT_ALPHA,
        }
    }
}

struct Candidate {
    item: RetrievedItem,
    semantic: Option<(usize, f64)>,
    keyword: Option<(usize, f64)>,
}

impl RRFusion {
    /// Create with a custom semantic weight; values outside [0, 1] are clamped
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    /// Create with custom weight and constant
    pub fn new(alpha: f64, k: f64) -> Self {
        Self {
            k,
            ..Self::with_alpha(alpha)
        }
    }

    fn contribution(&self, weight: f64, rank: usize) -> f64 {
        weight / (self.k + rank as f64 + 1.0)
    }

    /// Fuse semantic and keyword results using RRF
    ///
    /// The output has one entry per distinct id, at most `top_k` entries, and a
    /// fully deterministic order: fused score descending, then semantic rank
    /// (present before absent), then keyword rank, then id.
    pub fn fuse(
        &self,
        semantic_results: Vec<RetrievedItem>,
        keyword_results: Vec<RetrievedItem>,
        top_k: usize,
    ) -> Vec<FusedItem> {
        let mut candidates: Vec<Candidate> = Vec::with_capacity(semantic_results.len() + keyword_results.len());
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for (rank, item) in semantic_results.into_iter().enumerate() {
            // A backend repeating an id keeps its best rank
            if by_id.contains_key(&item.id) {
                continue;
            }
            let score = item.score;
            by_id.insert(item.id.clone(), candidates.len());
            candidates.push(Candidate {
                item,
                semantic: Some((rank, score)),
                keyword: None,
            });
        }

        for (rank, item) in keyword_results.into_iter().enumerate() {
            match by_id.get(&item.id) {
                Some(&slot) => {
                    let candidate = &mut candidates[slot];
                    if candidate.keyword.is_none() {
                        candidate.keyword = Some((rank, item.score));
                    }
                }
                None => {
                    let score = item.score;
                    by_id.insert(item.id.clone(), candidates.len());
                    candidates.push(Candidate {
                        item,
                        semantic: None,
                        keyword: Some((rank, score)),
                    });
                }
            }
        }

        let mut results: Vec<FusedItem> = candidates
            .into_iter()
            .map(|Candidate { mut item, semantic, keyword }| {
                let semantic_rrf = semantic
                    .map(|(rank, _)| self.contribution(self.alpha, rank))
                    .unwrap_or(0.0);
                let keyword_rrf = keyword
                    .map(|(rank, _)| self.contribution(1.0 - self.alpha, rank))
                    .unwrap_or(0.0);
                let fused = semantic_rrf + keyword_rrf;

                item.score = fused;
                item.retrieval_mode = RetrievalMode::Hybrid;

                FusedItem {
                    item,
                    score_breakdown: ScoreBreakdown {
                        semantic: semantic.map(|(_, s)| s).unwrap_or(0.0),
                        keyword: keyword.map(|(_, s)| s).unwrap_or(0.0),
                        fused,
                    },
                    semantic_rank: semantic.map(|(rank, _)| rank),
                    keyword_rank: keyword.map(|(rank, _)| rank),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score_breakdown
                .fused
                .total_cmp(&a.score_breakdown.fused)
                .then_with(|| present_first(a.semantic_rank, b.semantic_rank))
                .then_with(|| present_first(a.keyword_rank, b.keyword_rank))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        results.truncate(top_k);

        for (rank, result) in results.iter_mut().enumerate() {
            result.item.rank_in_source = rank;
        }

        results
    }

    /// Wrap a single backend's ranked list without re-scoring
    ///
    /// Used by the single-source strategies so every response carries the same
    /// item shape. The backend score becomes the fused score.
    pub fn passthrough(&self, results: Vec<RetrievedItem>, top_k: usize) -> Vec<FusedItem> {
        results
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(rank, mut item)| {
                let (semantic, keyword) = match item.retrieval_mode {
                    RetrievalMode::Keyword => (None, Some(rank)),
                    _ => (Some(rank), None),
                };
                let score_breakdown = ScoreBreakdown {
                    semantic: semantic.map(|_| item.score).unwrap_or(0.0),
                    keyword: keyword.map(|_| item.score).unwrap_or(0.0),
                    fused: item.score,
                };
                item.rank_in_source = rank;

                FusedItem {
                    item,
                    score_breakdown,
                    semantic_rank: semantic,
                    keyword_rank: keyword,
                }
            })
            .collect()
    }
}

fn present_first(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
