//! Process wiring: builds every collaborator from configuration

use crate::enhancer::QueryEnhancer;
use crate::generator::GenerationClient;
use crate::ingest::Ingestor;
use crate::pipeline::{PipelineSettings, RagPipeline};
use crate::tracker::QueryTracker;
use ragforge_common::cache::{CacheStore, MemoryCache, QueryCache, RedisCache};
use ragforge_common::config::AppConfig;
use ragforge_common::embeddings::create_embedder;
use ragforge_common::errors::Result;
use ragforge_common::llm::create_backend;
use ragforge_common::tokens::TokenCounter;
use ragforge_search::retrieval::InMemoryVectorIndex;
use ragforge_search::{HybridSearcher, KeywordIndex, RRFusion, VectorIndex};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct RagApp {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<RagPipeline>,
    pub ingestor: Arc<Ingestor>,
    pub tracker: Arc<QueryTracker>,
}

impl std::fmt::Debug for RagApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagApp")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RagApp {
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let backend = create_backend(&config.generation)?;
        let model = backend.model_name().to_string();

        // A disabled embedder has no dimension; semantic retrieval then degrades
        let vector: Option<Arc<dyn VectorIndex>> = match embedder.dimension() {
            0 => {
                warn!("Embeddings disabled, running without a vector index");
                None
            }
            dimension => Some(Arc::new(InMemoryVectorIndex::new(dimension))),
        };
        let keyword = Arc::new(KeywordIndex::default());

        let fusion = RRFusion::new(config.retrieval.alpha, config.retrieval.rrf_k);
        let searcher = HybridSearcher::new(embedder.clone(), vector.clone(), keyword.clone())
            .with_fusion(fusion)
            .with_min_score(config.retrieval.min_score);

        let generator = GenerationClient::new(
            backend.clone(),
            TokenCounter::new()?,
            config.generation.max_tokens,
        );

        let enhancer = QueryEnhancer::new(backend).with_token_limits(
            config.enhancement.hyde_max_tokens,
            config.enhancement.rewrite_max_tokens,
        );

        let tracker = Arc::new(QueryTracker::new());
        let cache = QueryCache::new(
            connect_cache(&config).await,
            config.cache.key_prefix.clone(),
            config.cache_ttl(),
        );

        let pipeline = RagPipeline::new(Arc::new(searcher), Arc::new(generator))
            .with_enhancer(Arc::new(enhancer))
            .with_tracker(tracker.clone())
            .with_cache(cache)
            .with_settings(PipelineSettings {
                default_top_k: config.retrieval.default_top_k,
                max_top_k: config.retrieval.max_top_k,
                rewrite_queries: config.enhancement.rewrite_queries,
            });

        let ingestor = Ingestor::new(embedder, vector, keyword)
            .with_batch_size(config.embedding.batch_size);

        info!(
            embedding = %config.embedding.provider,
            generation = %model,
            alpha = config.retrieval.alpha,
            "RAG pipeline ready"
        );

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            ingestor: Arc::new(ingestor),
            tracker,
        })
    }
}

/// Redis when configured and reachable, otherwise the in-memory store
async fn connect_cache(config: &AppConfig) -> Arc<dyn CacheStore> {
    if let Some(url) = &config.cache.redis_url {
        match RedisCache::connect(url).await {
            Ok(redis) => match redis.ping().await {
                Ok(()) => {
                    info!("Using Redis query cache");
                    return Arc::new(redis);
                }
                Err(e) => warn!(error = %e, "Redis ping failed, falling back to in-memory cache"),
            },
            Err(e) => warn!(error = %e, "Redis unavailable, falling back to in-memory cache"),
        }
    }
    Arc::new(MemoryCache::new(config.cache.memory_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Document;
    use crate::pipeline::QueryRequest;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = "hash".to_string();
        config.embedding.dimension = 64;
        config.generation.provider = "offline".to_string();
        config.cache.redis_url = None;
        config
    }

    #[tokio::test]
    async fn test_offline_app_answers_from_ingested_corpus() {
        let app = RagApp::from_config(offline_config()).await.unwrap();

        app.ingestor
            .ingest(vec![
                Document::new("rrf", "Reciprocal rank fusion merges ranked lists by summing reciprocal ranks.")
                    .with_source("rrf.md"),
                Document::new("bm25", "BM25 scores documents by term frequency and inverse document frequency.")
                    .with_source("bm25.md"),
            ])
            .await
            .unwrap();

        let response = app
            .pipeline
            .query(QueryRequest::new("inverse document frequency").strategy("keyword").top_k(1))
            .await
            .unwrap();

        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].id, "bm25");
        assert_eq!(response.cited_indices, vec![1]);
        assert_eq!(app.tracker.session_metrics().total_queries, 1);
    }

    #[tokio::test]
    async fn test_offline_answers_cost_nothing() {
        // Defaults keep the remote model name configured while answering offline
        let config = offline_config();
        assert_eq!(config.generation.model, "gpt-3.5-turbo");
        let app = tokio_test::assert_ok!(RagApp::from_config(config).await);

        app.ingestor
            .ingest(vec![Document::new("rrf", "Reciprocal rank fusion sums reciprocal ranks.")])
            .await
            .unwrap();

        let response = app
            .pipeline
            .query(QueryRequest::new("reciprocal rank fusion").strategy("keyword"))
            .await
            .unwrap();

        assert_eq!(response.metadata.model, ragforge_common::llm::OFFLINE_MODEL);
        assert!(response.metadata.tokens_used > 0);
        assert_eq!(response.metadata.estimated_cost, 0.0);
        assert_eq!(app.tracker.session_metrics().total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_disabled_embeddings_degrade_semantic() {
        let mut config = offline_config();
        config.embedding.provider = "none".to_string();
        let app = RagApp::from_config(config).await.unwrap();

        let response = app
            .pipeline
            .query(QueryRequest::new("anything").strategy("semantic"))
            .await
            .unwrap();
        assert!(response.sources.is_empty());
        assert!(response
            .metadata
            .degradations
            .contains(&"semantic_unavailable".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_a_configuration_error() {
        let mut config = offline_config();
        config.generation.provider = "mystery".to_string();
        tokio_test::assert_err!(RagApp::from_config(config).await);
    }
}
