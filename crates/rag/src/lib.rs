//! RagForge RAG
//!
//! Query orchestration on top of the retrieval crate:
//! - Query enhancement (rewrite, HyDE, expansion, decomposition)
//! - Numbered context assembly and citation-aware generation
//! - Cached, tracked query execution and strategy comparison
//! - Cancellable streamed answers
//! - Corpus ingestion into both indexes

pub mod app;
pub mod context;
pub mod enhancer;
pub mod generator;
pub mod ingest;
pub mod pipeline;
pub mod streaming;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use app::RagApp;
pub use context::{highlight_citations, Context, SourceView};
pub use enhancer::{Enhanced, EnhancementOutcome, QueryEnhancer};
pub use generator::{extract_citations, validate_citations, GenerationClient, GenerationResult, PriceTable};
pub use ingest::{Document, IngestReport, Ingestor};
pub use pipeline::{
    PipelineSettings, QueryMetadata, QueryRequest, QueryResponse, RagPipeline, StrategyComparison,
    StrategyResult,
};
pub use streaming::StreamEvent;
pub use tracker::{QueryEvent, QueryTracker, SessionMetrics};
