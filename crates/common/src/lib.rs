//! RagForge Common Library
//!
//! Shared code for the RagForge crates including:
//! - Error types and handling
//! - Configuration management
//! - Query result caching
//! - Embedding client abstraction
//! - Generation backend abstraction
//! - Token counting
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod tokens;

// Re-export commonly used types
pub use cache::{CacheStore, QueryCache};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{CompletionRequest, GenerationBackend, TextStream};
pub use tokens::TokenCounter;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lifetime of cached query responses
pub const QUERY_CACHE_TTL_SECS: u64 = 3600;
