//! Strategy-driven retrieval over the semantic and keyword backends
//!
//! Hybrid search runs both backends in parallel and fuses them with RRF. A
//! failing component is absorbed as an empty list and reported as a
//! degradation; single-source strategies propagate backend errors instead.

use super::{
    fusion::RRFusion, FusedItem, KeywordBackend, RetrievedItem, Strategy, VectorIndex,
};
use ragforge_common::embeddings::Embedder;
use ragforge_common::errors::Result;
use ragforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A retrieval component that contributed an empty list instead of results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// No vector index is configured, or it could not be searched
    SemanticUnavailable,
    /// The query could not be embedded
    SemanticFailed,
    /// The keyword backend returned an error
    KeywordFailed,
}

impl Degradation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Degradation::SemanticUnavailable => "semantic_unavailable",
            Degradation::SemanticFailed => "semantic_failed",
            Degradation::KeywordFailed => "keyword_failed",
        }
    }
}

/// Ranked items plus the components that degraded while producing them
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub items: Vec<FusedItem>,
    pub degradations: Vec<Degradation>,
}

struct SemanticHits {
    items: Vec<RetrievedItem>,
    degradation: Option<Degradation>,
}

impl SemanticHits {
    fn degraded(degradation: Degradation) -> Self {
        Self {
            items: Vec::new(),
            degradation: Some(degradation),
        }
    }
}

/// Retriever dispatching on [`Strategy`]
pub struct HybridSearcher {
    embedder: Arc<dyn Embedder>,
    vector: Option<Arc<dyn VectorIndex>>,
    keyword: Arc<dyn KeywordBackend>,
    fusion: RRFusion,
    min_score: f64,
}

impl HybridSearcher {
    /// Create a searcher; `vector` may be absent, in which case semantic results are empty
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Option<Arc<dyn VectorIndex>>,
        keyword: Arc<dyn KeywordBackend>,
    ) -> Self {
        Self {
            embedder,
            vector,
            keyword,
            fusion: RRFusion::default(),
            min_score: 0.0,
        }
    }

    /// Use custom fusion parameters
    pub fn with_fusion(mut self, fusion: RRFusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Minimum cosine similarity for semantic hits
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn fusion(&self) -> &RRFusion {
        &self.fusion
    }

    pub fn has_vector_index(&self) -> bool {
        self.vector.is_some()
    }

    async fn semantic_hits(&self, text: &str, limit: usize) -> Result<SemanticHits> {
        let Some(index) = &self.vector else {
            return Ok(SemanticHits::degraded(Degradation::SemanticUnavailable));
        };

        let embedding = self.embedder.embed(text).await?;

        match index.search(&embedding, limit, self.min_score).await {
            Ok(items) => Ok(SemanticHits {
                items,
                degradation: None,
            }),
            Err(e) => {
                warn!(error = %e, "Vector index search failed, treating as empty");
                Ok(SemanticHits::degraded(Degradation::SemanticUnavailable))
            }
        }
    }

    /// Retrieve at most `top_k` items for `text` using `strategy`
    ///
    /// For [`Strategy::Hyde`] the caller passes the already expanded search text.
    pub async fn retrieve(&self, strategy: Strategy, text: &str, top_k: usize) -> Result<RetrievalOutcome> {
        let start = Instant::now();

        let outcome = match strategy {
            Strategy::Semantic | Strategy::Hyde => {
                let hits = self.semantic_hits(text, top_k).await?;
                RetrievalOutcome {
                    items: self.fusion.passthrough(hits.items, top_k),
                    degradations: hits.degradation.into_iter().collect(),
                }
            }
            Strategy::Keyword => {
                let items = self.keyword.search(text, top_k)?;
                RetrievalOutcome {
                    items: self.fusion.passthrough(items, top_k),
                    degradations: Vec::new(),
                }
            }
            Strategy::Hybrid => self.hybrid(text, top_k).await,
        };

        for degradation in &outcome.degradations {
            metrics::record_degradation(degradation.as_str());
        }
        metrics::record_retrieval(start.elapsed().as_secs_f64(), strategy.as_str(), outcome.items.len());

        debug!(
            strategy = %strategy,
            results = outcome.items.len(),
            degradations = outcome.degradations.len(),
            "Retrieval complete"
        );

        Ok(outcome)
    }

    async fn hybrid(&self, text: &str, top_k: usize) -> RetrievalOutcome {
        // Fetch more results from each retriever for better fusion
        let expanded_limit = top_k.saturating_mul(2);

        let (semantic, keyword) = tokio::join!(self.semantic_hits(text, expanded_limit), async {
            self.keyword.search(text, expanded_limit)
        });

        let mut degradations = Vec::new();

        let semantic = match semantic {
            Ok(hits) => {
                degradations.extend(hits.degradation);
                hits.items
            }
            Err(e) => {
                warn!(error = %e, "Semantic retrieval failed, continuing with keyword results");
                degradations.push(Degradation::SemanticFailed);
                Vec::new()
            }
        };

        let keyword = keyword.unwrap_or_else(|e| {
            warn!(error = %e, "Keyword retrieval failed, continuing with semantic results");
            degradations.push(Degradation::KeywordFailed);
            Vec::new()
        });

        RetrievalOutcome {
            items: self.fusion.fuse(semantic, keyword, top_k),
            degradations,
        }
    }
}
