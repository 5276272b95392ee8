//! Multi-modal retrieval system
//!
//! Provides four retrieval strategies over two backends:
//! - Semantic search (vector similarity via embeddings)
//! - Keyword search (in-memory BM25)
//! - Hybrid search (RRF fusion of semantic + keyword)
//! - HyDE (semantic search over the query plus a hypothetical answer)

mod fusion;
mod hybrid;
mod keyword;
mod strategy;
mod vector;

pub use fusion::{RRFusion, DEFAULT_ALPHA, DEFAULT_RRF_K};
pub use hybrid::{Degradation, HybridSearcher, RetrievalOutcome};
pub use keyword::{Bm25Params, KeywordDocument, KeywordIndex};
pub use strategy::Strategy;
pub use vector::{InMemoryVectorIndex, VectorRecord};

use async_trait::async_trait;
use ragforge_common::errors::Result;
use serde::{Deserialize, Serialize};

/// Label used when a chunk declares no source
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Retrieved chunk with relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// Chunk ID, stable across re-indexing
    pub id: String,

    /// Chunk content
    pub content: String,

    /// Backend score (cosine similarity, BM25, or fused RRF score)
    pub score: f64,

    /// Declared source label (file name, URL, ...)
    pub source: Option<String>,

    /// Page within the source document, when known
    pub page: Option<u32>,

    /// 0-based rank within the list that produced this item
    pub rank_in_source: usize,

    /// Retrieval mode that produced the score
    pub retrieval_mode: RetrievalMode,
}

impl RetrievedItem {
    /// Source label for display and citation, "Unknown" when undeclared
    pub fn source_label(&self) -> &str {
        self.source.as_deref().unwrap_or(UNKNOWN_SOURCE)
    }
}

/// Retrieval mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Vector similarity search
    Semantic,
    /// BM25 lexical search
    Keyword,
    /// Combined hybrid search
    Hybrid,
}

/// Per-component scores of a fused item
///
/// `semantic` and `keyword` are the raw backend scores (0 when the item was not
/// returned by that backend); `fused` is the final ranking score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub keyword: f64,
    pub fused: f64,
}

/// Retrieved item after fusion, one per distinct id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedItem {
    #[serde(flatten)]
    pub item: RetrievedItem,

    pub score_breakdown: ScoreBreakdown,

    /// 0-based rank in the semantic input list
    pub semantic_rank: Option<usize>,

    /// 0-based rank in the keyword input list
    pub keyword_rank: Option<usize>,
}

impl FusedItem {
    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn score(&self) -> f64 {
        self.score_breakdown.fused
    }
}

/// Nearest-neighbour search over stored embeddings
///
/// An unreachable backing store yields an empty result rather than an error.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Items ordered by descending similarity, at most `limit`, all scoring >= `min_score`
    async fn search(&self, vector: &[f32], limit: usize, min_score: f64) -> Result<Vec<RetrievedItem>>;

    /// Insert or replace records by id
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Number of stored records
    async fn len(&self) -> Result<usize>;
}

/// Sparse keyword retrieval over the current corpus snapshot
pub trait KeywordBackend: Send + Sync {
    /// Top `limit` items with a strictly positive score, best first
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedItem>>;
}
