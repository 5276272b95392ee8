//! Vector similarity search over an in-process store
//!
//! Provides semantic search via cosine similarity between the query embedding
//! and stored chunk embeddings.

use super::{RetrievalMode, RetrievedItem, VectorIndex};
use async_trait::async_trait;
use ragforge_common::embeddings::cosine_similarity;
use ragforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Stored chunk with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source: Option<String>,
    pub page: Option<u32>,
}

/// Brute-force cosine index, suitable for small corpora and tests
pub struct InMemoryVectorIndex {
    dimension: usize,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index accepting embeddings of `dimension`
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, vector: &[f32], limit: usize, min_score: f64) -> Result<Vec<RetrievedItem>> {
        if vector.len() != self.dimension {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Query embedding has dimension {}, index expects {}",
                    vector.len(),
                    self.dimension
                ),
            });
        }

        let records = self.records.read().await;

        let mut scored: Vec<(f64, &VectorRecord)> = records
            .iter()
            .map(|r| (cosine_similarity(vector, &r.embedding), r))
            .filter(|(score, _)| *score >= min_score)
            .collect();

        // Stable: equal similarities keep insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(rank, (score, r))| RetrievedItem {
                id: r.id.clone(),
                content: r.content.clone(),
                score,
                source: r.source.clone(),
                page: r.page,
                rank_in_source: rank,
                retrieval_mode: RetrievalMode::Semantic,
            })
            .collect())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != self.dimension) {
            return Err(AppError::Validation {
                message: format!(
                    "Embedding for '{}' has dimension {}, index expects {}",
                    bad.id,
                    bad.embedding.len(),
                    self.dimension
                ),
                field: Some("embedding".to_string()),
            });
        }

        let mut stored = self.records.write().await;
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }

        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}
