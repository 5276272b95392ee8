//! Retrieval strategy selection

use ragforge_common::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a query is turned into ranked context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Dense vector search over the query embedding
    Semantic,
    /// BM25 over the in-memory corpus
    #[serde(alias = "bm25")]
    Keyword,
    /// Semantic and keyword fused with RRF
    Hybrid,
    /// Semantic search over the query plus a generated hypothetical answer
    Hyde,
}

impl Strategy {
    /// Every strategy, in comparison order
    pub const ALL: [Strategy; 4] = [
        Strategy::Semantic,
        Strategy::Keyword,
        Strategy::Hybrid,
        Strategy::Hyde,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Semantic => "semantic",
            Strategy::Keyword => "keyword",
            Strategy::Hybrid => "hybrid",
            Strategy::Hyde => "hyde",
        }
    }

    /// Whether the query may be rewritten before retrieval
    pub fn supports_rewrite(&self) -> bool {
        matches!(self, Strategy::Semantic | Strategy::Hybrid)
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Hybrid
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(Strategy::Semantic),
            "keyword" | "bm25" => Ok(Strategy::Keyword),
            "hybrid" => Ok(Strategy::Hybrid),
            "hyde" => Ok(Strategy::Hyde),
            _ => Err(AppError::InvalidStrategy { name: s.to_string() }),
        }
    }
}
