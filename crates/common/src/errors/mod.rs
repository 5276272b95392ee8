//! Error types for RagForge services
//!
//! Provides a single error enum for the retrieval and generation pipeline with:
//! - Distinct variants for each failure mode of the query flow
//! - Machine-readable error codes
//! - A recoverability split between degradations absorbed locally
//!   and failures that must reach the caller

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors (1xxx)
    ValidationError,
    InvalidStrategy,

    // Backend errors (2xxx)
    BackendUnavailable,
    EmbeddingError,
    UpstreamError,

    // Generation errors (3xxx)
    GenerationFailed,

    // Degradations (4xxx)
    CacheUnavailable,
    EnhancementFailed,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidStrategy => 1002,

            ErrorCode::BackendUnavailable => 2001,
            ErrorCode::EmbeddingError => 2002,
            ErrorCode::UpstreamError => 2003,

            ErrorCode::GenerationFailed => 3001,

            ErrorCode::CacheUnavailable => 4001,
            ErrorCode::EnhancementFailed => 4002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Request errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid strategy '{name}': expected one of semantic, keyword, hybrid, hyde")]
    InvalidStrategy { name: String },

    // Backend errors
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Generation errors
    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    // Degradations
    #[error("Cache unavailable: {message}")]
    CacheUnavailable { message: String },

    #[error("Query enhancement failed: {message}")]
    EnhancementFailed { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a backend that is not initialized or not reachable
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidStrategy { .. } => ErrorCode::InvalidStrategy,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::GenerationFailed { .. } => ErrorCode::GenerationFailed,
            AppError::CacheUnavailable { .. } => ErrorCode::CacheUnavailable,
            AppError::EnhancementFailed { .. } => ErrorCode::EnhancementFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Degradations that are absorbed where they happen and never reach the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::CacheUnavailable { .. } | AppError::EnhancementFailed { .. }
        )
    }

    /// Errors rejected before any backend was contacted
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::InvalidStrategy { .. }
        )
    }
}

/// Structured error payload, used when a failure is reported by value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&AppError> for ErrorDetails {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
