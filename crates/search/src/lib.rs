//! RagForge Search
//!
//! Retrieval backends and fusion:
//! - In-memory BM25 keyword index with snapshot rebuilds
//! - Vector similarity search
//! - Reciprocal Rank Fusion of semantic and keyword results
//! - Strategy dispatch with graceful degradation

pub mod retrieval;

pub use retrieval::{
    Degradation, FusedItem, HybridSearcher, KeywordBackend, KeywordDocument, KeywordIndex,
    RRFusion, RetrievalMode, RetrievalOutcome, RetrievedItem, ScoreBreakdown, Strategy,
    VectorIndex,
};
