//! Configuration management for RagForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Retrieval and fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query result cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Query enhancement configuration
    #[serde(default)]
    pub enhancement: EnhancementConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Semantic weight in reciprocal rank fusion (keyword gets 1 - alpha)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// RRF damping constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Results per query when the caller does not say
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound accepted for top_k
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Minimum similarity for vector hits
    #[serde(default)]
    pub min_score: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Redis URL; the in-memory store is used when unset
    pub redis_url: Option<String>,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum entries held by the in-memory store
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: hash, openai, none
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension for the hash embedder and for OpenAI-compatible models of unknown size
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Batch size for ingestion-time embedding
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: openai, offline
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key
    pub api_key: Option<String>,

    /// Chat completions endpoint base (OpenAI-compatible)
    pub api_base: Option<String>,

    /// Model name, also used for pricing
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Maximum answer tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnhancementConfig {
    /// Rewrite semantic and hybrid queries before retrieval
    #[serde(default = "default_enabled")]
    pub rewrite_queries: bool,

    /// Token cap for hypothetical answers
    #[serde(default = "default_hyde_max_tokens")]
    pub hyde_max_tokens: usize,

    /// Token cap for rewrites
    #[serde(default = "default_rewrite_max_tokens")]
    pub rewrite_max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name attached to log lines
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_alpha() -> f64 { 0.5 }
fn default_rrf_k() -> f64 { 60.0 }
fn default_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 50 }
fn default_cache_ttl() -> u64 { crate::QUERY_CACHE_TTL_SECS }
fn default_key_prefix() -> String { "ragforge".to_string() }
fn default_memory_capacity() -> usize { 1024 }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_model() -> String { "feature-hash-v1".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_request_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 32 }
fn default_generation_provider() -> String { "offline".to_string() }
fn default_generation_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_max_tokens() -> usize { 1000 }
fn default_temperature() -> f32 { 0.7 }
fn default_generation_timeout() -> u64 { 60 }
fn default_enabled() -> bool { true }
fn default_hyde_max_tokens() -> usize { 150 }
fn default_rewrite_max_tokens() -> usize { 100 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "ragforge".to_string() }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            rrf_k: default_rrf_k(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            min_score: 0.0,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: default_cache_ttl(),
            key_prefix: default_key_prefix(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_request_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: None,
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            rewrite_queries: default_enabled(),
            hyde_max_tokens: default_hyde_max_tokens(),
            rewrite_max_tokens: default_rewrite_max_tokens(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__ALPHA=0.7
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let retrieval = &self.retrieval;
        if !(0.0..=1.0).contains(&retrieval.alpha) {
            return Err(AppError::Configuration {
                message: format!("retrieval.alpha must be within [0, 1], got {}", retrieval.alpha),
            });
        }
        if retrieval.rrf_k < 0.0 {
            return Err(AppError::Configuration {
                message: "retrieval.rrf_k must not be negative".to_string(),
            });
        }
        if retrieval.default_top_k == 0 || retrieval.max_top_k == 0 {
            return Err(AppError::Configuration {
                message: "retrieval top_k bounds must be positive".to_string(),
            });
        }
        if retrieval.default_top_k > retrieval.max_top_k {
            return Err(AppError::Configuration {
                message: "retrieval.default_top_k exceeds retrieval.max_top_k".to_string(),
            });
        }
        if self.cache.ttl_secs == 0 {
            return Err(AppError::Configuration {
                message: "cache.ttl_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get cache TTL as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}
