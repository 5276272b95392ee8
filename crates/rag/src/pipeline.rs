//! RAG pipeline - per-query orchestration
//!
//! query -> (optional enhancement) -> strategy retrieval -> context assembly
//! -> generation -> citation extraction -> cached, tracked response

use crate::context::{Context, SourceView};
use crate::enhancer::{hyde_search_text, QueryEnhancer};
use crate::generator::{GenerationClient, GenerationResult};
use crate::tracker::QueryTracker;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use ragforge_common::cache::{keys, QueryCache};
use ragforge_common::errors::{AppError, ErrorCode, Result};
use ragforge_common::metrics;
use ragforge_search::retrieval::RetrievalOutcome;
use ragforge_search::{HybridSearcher, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

/// Degradation reported when query enhancement fell back to the original query
pub const ENHANCEMENT_FAILED: &str = "enhancement_failed";

/// A query as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    /// Strategy name; parsed before any backend is touched
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Results to retrieve; the pipeline default when absent
    #[serde(default)]
    #[validate(range(min = 1))]
    pub top_k: Option<usize>,

    #[serde(default = "default_use_cache")]
    pub use_cache: bool,

    #[serde(default = "default_temperature")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
}

fn default_strategy() -> String {
    Strategy::default().as_str().to_string()
}

fn default_use_cache() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            strategy: default_strategy(),
            top_k: None,
            use_cache: default_use_cache(),
            temperature: default_temperature(),
        }
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Timings, usage and provenance of one answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub strategy: Strategy,
    /// The text actually searched with, when it differs from the question
    pub enhanced_query: Option<String>,
    pub num_retrieved: usize,
    pub retrieval_ms: f64,
    pub generation_ms: f64,
    pub total_ms: f64,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub tokens_used: usize,
    pub estimated_cost: f64,
    pub model: String,
    pub cached: bool,
    /// Components that degraded to an empty result or a fallback
    pub degradations: Vec<String>,
}

/// Answer with citations and the sources they point to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Ascending `[N]` markers found in the answer, unchecked against `sources`
    pub cited_indices: Vec<usize>,
    pub sources: Vec<SourceView>,
    pub metadata: QueryMetadata,
}

/// Short per-strategy summary used in comparisons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub answer: String,
    pub num_sources: usize,
    pub total_ms: f64,
    pub tokens_used: usize,
    pub estimated_cost: f64,
}

/// Outcome of one strategy in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyResult {
    Success {
        summary: StrategySummary,
        response: Box<QueryResponse>,
    },
    Failed {
        error: String,
        code: ErrorCode,
    },
}

impl StrategyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StrategyResult::Success { .. })
    }
}

/// Side-by-side results of several strategies for one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub question: String,
    pub top_k: usize,
    pub timestamp: DateTime<Utc>,
    /// Keyed by the strategy name as requested
    pub strategies: BTreeMap<String, StrategyResult>,
}

/// Pipeline limits and switches
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    /// Rewrite semantic and hybrid queries when an enhancer is present
    pub rewrite_queries: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 50,
            rewrite_queries: true,
        }
    }
}

/// A validated query, ready to run
#[derive(Debug, Clone)]
pub(crate) struct PreparedQuery {
    pub question: String,
    pub strategy: Strategy,
    pub top_k: usize,
    pub temperature: f32,
}

/// Text to retrieve with, plus degradations met while producing it
pub(crate) struct SearchPlan {
    pub text: String,
    pub degradations: Vec<String>,
}

pub(crate) fn assemble_response(
    prepared: &PreparedQuery,
    plan: SearchPlan,
    outcome: &RetrievalOutcome,
    generation: GenerationResult,
    retrieval_ms: f64,
    start: Instant,
) -> QueryResponse {
    let mut degradations = plan.degradations;
    degradations.extend(outcome.degradations.iter().map(|d| d.as_str().to_string()));

    let metadata = QueryMetadata {
        strategy: prepared.strategy,
        enhanced_query: (plan.text != prepared.question).then_some(plan.text),
        num_retrieved: outcome.items.len(),
        retrieval_ms,
        generation_ms: generation.latency.as_secs_f64() * 1000.0,
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
        input_tokens: generation.input_tokens,
        output_tokens: generation.output_tokens,
        tokens_used: generation.total_tokens(),
        estimated_cost: generation.cost,
        model: generation.model,
        cached: false,
        degradations,
    };

    QueryResponse {
        answer: generation.answer,
        cited_indices: generation.cited_indices,
        sources: SourceView::from_items(&outcome.items),
        metadata,
    }
}

/// RAG orchestrator
pub struct RagPipeline {
    searcher: Arc<HybridSearcher>,
    generator: Arc<GenerationClient>,
    enhancer: Option<Arc<QueryEnhancer>>,
    tracker: Option<Arc<QueryTracker>>,
    cache: Option<QueryCache>,
    settings: PipelineSettings,
}

impl RagPipeline {
    pub fn new(searcher: Arc<HybridSearcher>, generator: Arc<GenerationClient>) -> Self {
        Self {
            searcher,
            generator,
            enhancer: None,
            tracker: None,
            cache: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<QueryEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<QueryTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tracker(&self) -> Option<&Arc<QueryTracker>> {
        self.tracker.as_ref()
    }

    pub(crate) fn generator(&self) -> &GenerationClient {
        &self.generator
    }

    pub(crate) fn searcher(&self) -> &HybridSearcher {
        &self.searcher
    }

    /// Validate a request and resolve its strategy and top-k
    pub(crate) fn prepare(&self, request: &QueryRequest) -> Result<PreparedQuery> {
        request.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: None,
        })?;

        if request.question.trim().is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be blank".to_string(),
                field: Some("question".to_string()),
            });
        }

        let strategy: Strategy = request.strategy.parse()?;

        let top_k = request.top_k.unwrap_or(self.settings.default_top_k);
        if top_k == 0 || top_k > self.settings.max_top_k {
            return Err(AppError::Validation {
                message: format!("top_k must be between 1 and {}", self.settings.max_top_k),
                field: Some("top_k".to_string()),
            });
        }

        Ok(PreparedQuery {
            question: request.question.clone(),
            strategy,
            top_k,
            temperature: request.temperature,
        })
    }

    /// Decide the text to retrieve with
    pub(crate) async fn plan_search(&self, question: &str, strategy: Strategy) -> SearchPlan {
        let mut degradations = Vec::new();

        let Some(enhancer) = &self.enhancer else {
            return SearchPlan {
                text: question.to_string(),
                degradations,
            };
        };

        let text = match strategy {
            Strategy::Hyde => {
                let hypothetical = enhancer.hyde(question).await;
                if hypothetical.is_failed() {
                    degradations.push(ENHANCEMENT_FAILED.to_string());
                }
                if hypothetical.is_applied() {
                    hyde_search_text(question, &hypothetical.text)
                } else {
                    question.to_string()
                }
            }
            s if s.supports_rewrite() && self.settings.rewrite_queries => {
                let rewritten = enhancer.rewrite(question).await;
                if rewritten.is_failed() {
                    degradations.push(ENHANCEMENT_FAILED.to_string());
                }
                rewritten.text
            }
            _ => question.to_string(),
        };

        SearchPlan { text, degradations }
    }

    /// Answer a question
    ///
    /// A cache hit returns the stored response with `cached` set and touches no
    /// backend. Only successful responses are cached.
    #[instrument(skip(self, request), fields(strategy = %request.strategy))]
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let start = Instant::now();
        let prepared = self.prepare(&request)?;
        let strategy_name = prepared.strategy.as_str();

        let cache_key = keys::query(strategy_name, &prepared.question, prepared.top_k);
        let cache = self.cache.as_ref().filter(|_| request.use_cache);

        if let Some(cache) = cache {
            if let Some(payload) = cache.get(&cache_key).await {
                match serde_json::from_str::<QueryResponse>(&payload) {
                    Ok(mut response) => {
                        response.metadata.cached = true;
                        if let Some(tracker) = &self.tracker {
                            tracker.log_cache_hit(&prepared.question, strategy_name);
                        }
                        metrics::record_query(start.elapsed().as_secs_f64(), strategy_name, "cache_hit");
                        debug!("Serving cached response");
                        return Ok(response);
                    }
                    Err(e) => warn!(error = %e, "Discarding unreadable cache entry"),
                }
            }
        }

        let query_id = self
            .tracker
            .as_ref()
            .map(|t| t.start_query(&prepared.question, strategy_name));

        let result = self.execute(&prepared, start).await;

        if let (Some(tracker), Some(id)) = (&self.tracker, query_id) {
            tracker.complete_query(id, result.as_ref());
        }

        match &result {
            Ok(response) => {
                metrics::record_query(start.elapsed().as_secs_f64(), strategy_name, "success");
                if let Some(cache) = cache {
                    match serde_json::to_string(response) {
                        Ok(payload) => cache.set(&cache_key, &payload).await,
                        Err(e) => warn!(error = %e, "Failed to serialize response for cache"),
                    }
                }
            }
            Err(e) => {
                metrics::record_query(start.elapsed().as_secs_f64(), strategy_name, "error");
                error!(error = %e, code = e.code().as_code(), "Query failed");
            }
        }

        result
    }

    async fn execute(&self, prepared: &PreparedQuery, start: Instant) -> Result<QueryResponse> {
        let plan = self.plan_search(&prepared.question, prepared.strategy).await;

        let retrieval_start = Instant::now();
        let outcome = self
            .searcher
            .retrieve(prepared.strategy, &plan.text, prepared.top_k)
            .await?;
        let retrieval_ms = retrieval_start.elapsed().as_secs_f64() * 1000.0;

        let context = Context::from_items(&outcome.items);
        if context.is_empty() {
            info!("No context retrieved, generating without sources");
        }

        let generation = self
            .generator
            .generate_with_citations(&prepared.question, &context, prepared.temperature)
            .await?;

        Ok(assemble_response(prepared, plan, &outcome, generation, retrieval_ms, start))
    }

    /// Run several strategies concurrently, caching disabled
    ///
    /// Each strategy succeeds or fails on its own.
    pub async fn compare_strategies(
        &self,
        question: &str,
        strategies: &[String],
        top_k: usize,
    ) -> StrategyComparison {
        let runs = strategies.iter().map(|name| {
            let request = QueryRequest::new(question)
                .strategy(name.clone())
                .top_k(top_k)
                .use_cache(false);
            async move { (name.clone(), self.query(request).await) }
        });

        let strategies = join_all(runs)
            .await
            .into_iter()
            .map(|(name, result)| {
                let entry = match result {
                    Ok(response) => StrategyResult::Success {
                        summary: StrategySummary {
                            answer: response.answer.clone(),
                            num_sources: response.sources.len(),
                            total_ms: response.metadata.total_ms,
                            tokens_used: response.metadata.tokens_used,
                            estimated_cost: response.metadata.estimated_cost,
                        },
                        response: Box::new(response),
                    },
                    Err(e) => StrategyResult::Failed {
                        error: e.to_string(),
                        code: e.code(),
                    },
                };
                (name, entry)
            })
            .collect();

        StrategyComparison {
            question: question.to_string(),
            top_k,
            timestamp: Utc::now(),
            strategies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keyword_pipeline, BrokenKeyword, CountingEmbedder, ScriptedBackend};
    use ragforge_common::cache::MemoryCache;
    use ragforge_common::llm::GenerationBackend;
    use ragforge_common::tokens::TokenCounter;
    use ragforge_search::retrieval::{InMemoryVectorIndex, VectorRecord};
    use ragforge_search::{KeywordBackend, KeywordDocument, KeywordIndex, VectorIndex};
    use ragforge_common::embeddings::Embedder;
    use std::time::Duration;

    const DOCS: [(&str, &str, &str); 3] = [
        ("rrf", "Reciprocal rank fusion combines ranked lists without score normalization.", "rrf.md"),
        ("bm25", "BM25 ranks documents using term frequency and document length.", "bm25.md"),
        ("hyde", "HyDE embeds a hypothetical answer to improve semantic search.", "hyde.md"),
    ];

    struct Fixture {
        embedder: Arc<CountingEmbedder>,
        backend: Arc<ScriptedBackend>,
        pipeline: RagPipeline,
    }

    async fn vector_index(embedder: &CountingEmbedder) -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new(embedder.dimension()));
        let mut records = Vec::new();
        for (id, text, source) in DOCS {
            records.push(VectorRecord {
                id: id.to_string(),
                content: text.to_string(),
                embedding: embedder.embed(text).await.unwrap(),
                source: Some(source.to_string()),
                page: None,
            });
        }
        index.upsert(records).await.unwrap();
        index
    }

    fn keyword_index() -> Arc<KeywordIndex> {
        let index = Arc::new(KeywordIndex::default());
        index.build(
            DOCS.iter()
                .map(|(id, text, source)| KeywordDocument::new(*id, *text).with_source(*source))
                .collect(),
        );
        index
    }

    async fn fixture(
        backend: ScriptedBackend,
        with_vector: bool,
        keyword: Option<Arc<dyn KeywordBackend>>,
    ) -> Fixture {
        let embedder = Arc::new(CountingEmbedder::new(64));
        let vector = if with_vector {
            Some(vector_index(&embedder).await as Arc<dyn VectorIndex>)
        } else {
            None
        };
        let keyword = keyword.unwrap_or_else(|| keyword_index() as Arc<dyn KeywordBackend>);
        let backend = Arc::new(backend);

        let searcher = HybridSearcher::new(embedder.clone(), vector, keyword);
        let generator = GenerationClient::new(
            backend.clone() as Arc<dyn GenerationBackend>,
            TokenCounter::new().unwrap(),
            256,
        );
        let pipeline = RagPipeline::new(Arc::new(searcher), Arc::new(generator))
            .with_tracker(Arc::new(QueryTracker::new()))
            .with_cache(QueryCache::new(
                Arc::new(MemoryCache::new(64)),
                "test",
                Duration::from_secs(3600),
            ))
            .with_settings(PipelineSettings {
                rewrite_queries: false,
                ..PipelineSettings::default()
            });

        Fixture {
            embedder,
            backend,
            pipeline,
        }
    }

    fn answering(text: &'static str) -> ScriptedBackend {
        ScriptedBackend::with(move |req| {
            if req.prompt.contains("Answer with citations:") {
                Ok(text.to_string())
            } else {
                Ok("unused".to_string())
            }
        })
    }

    #[tokio::test]
    async fn test_query_end_to_end() {
        let f = fixture(answering("Fusion merges rankings [1]."), true, None).await;

        let response = f
            .pipeline
            .query(QueryRequest::new("How does reciprocal rank fusion work?").top_k(2))
            .await
            .unwrap();

        assert_eq!(response.answer, "Fusion merges rankings [1].");
        assert_eq!(response.cited_indices, vec![1]);
        assert!(!response.sources.is_empty() && response.sources.len() <= 2);
        assert_eq!(response.sources[0].id, "rrf");
        assert_eq!(response.sources[0].citation_index, 1);
        assert_eq!(response.metadata.strategy, Strategy::Hybrid);
        assert!(!response.metadata.cached);
        assert!(response.metadata.enhanced_query.is_none());
        assert!(response.metadata.degradations.is_empty());
        assert_eq!(
            response.metadata.tokens_used,
            response.metadata.input_tokens + response.metadata.output_tokens
        );
    }

    #[tokio::test]
    async fn test_cache_hit_is_identical_and_skips_backends() {
        let f = fixture(answering("Cached answer [1]."), true, None).await;
        let request = QueryRequest::new("What is BM25?").strategy("hybrid").top_k(2);

        let first = f.pipeline.query(request.clone()).await.unwrap();
        let embed_calls = f.embedder.calls();
        let llm_calls = f.backend.calls();

        let second = f
            .pipeline
            .query(request.clone().strategy("hybrid"))
            .await
            .unwrap();
        assert_eq!(f.embedder.calls(), embed_calls);
        assert_eq!(f.backend.calls(), llm_calls);

        assert!(second.metadata.cached);
        let mut second_uncached = second.clone();
        second_uncached.metadata.cached = false;
        assert_eq!(
            serde_json::to_string(&second_uncached).unwrap(),
            serde_json::to_string(&first).unwrap()
        );

        // Whitespace differences normalize to the same key
        let spaced = f
            .pipeline
            .query(QueryRequest::new("  What   is BM25? ").top_k(2))
            .await
            .unwrap();
        assert!(spaced.metadata.cached);

        let metrics = f.pipeline.tracker().unwrap().session_metrics();
        assert_eq!(metrics.cache_hits, 2);
        assert_eq!(metrics.total_queries, 3);
    }

    #[tokio::test]
    async fn test_use_cache_false_bypasses_cache() {
        let f = fixture(answering("Fresh [1]."), true, None).await;
        let request = QueryRequest::new("What is BM25?").use_cache(false);

        f.pipeline.query(request.clone()).await.unwrap();
        let second = f.pipeline.query(request).await.unwrap();
        assert!(!second.metadata.cached);
        assert_eq!(f.backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let f = fixture(ScriptedBackend::failing("quota exceeded"), true, None).await;
        let request = QueryRequest::new("What is BM25?");

        let err = f.pipeline.query(request.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed { .. }));
        assert!(f.pipeline.query(request).await.is_err());
        assert_eq!(f.backend.calls(), 2);

        let metrics = f.pipeline.tracker().unwrap().session_metrics();
        assert_eq!(metrics.failed_queries, 2);
        assert_eq!(metrics.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_degrades_without_vector_index() {
        let f = fixture(answering("Only keywords [1]."), false, None).await;

        for strategy in ["semantic", "hybrid"] {
            let response = f
                .pipeline
                .query(QueryRequest::new("term frequency document length").strategy(strategy))
                .await
                .unwrap();
            assert!(response
                .metadata
                .degradations
                .contains(&"semantic_unavailable".to_string()));
            assert!(response
                .sources
                .iter()
                .all(|s| s.score_breakdown.semantic == 0.0));
            if strategy == "hybrid" {
                assert_eq!(response.sources[0].id, "bm25");
            } else {
                assert!(response.sources.is_empty());
            }
        }
        assert_eq!(f.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_retrieval_still_generates() {
        let f = fixture(
            ScriptedBackend::with(|req| {
                assert!(req.prompt.contains("Context:\n\n\nQuestion:"));
                Ok("Not enough information.".to_string())
            }),
            false,
            None,
        )
        .await;

        let response = f
            .pipeline
            .query(QueryRequest::new("zebra migration").strategy("keyword"))
            .await
            .unwrap();
        assert!(response.sources.is_empty());
        assert!(response.cited_indices.is_empty());
        assert_eq!(response.answer, "Not enough information.");
    }

    #[tokio::test]
    async fn test_invalid_strategy_fails_before_backends() {
        let f = fixture(answering("x"), true, None).await;
        let embed_calls = f.embedder.calls();

        let err = f
            .pipeline
            .query(QueryRequest::new("anything").strategy("magic"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStrategy { .. }));
        assert_eq!(f.embedder.calls(), embed_calls);
        assert_eq!(f.backend.calls(), 0);
        assert_eq!(f.pipeline.tracker().unwrap().session_metrics().total_queries, 0);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let f = fixture(answering("x"), true, None).await;
        for request in [
            QueryRequest::new("   "),
            QueryRequest::new("q").top_k(0),
            QueryRequest::new("q").top_k(51),
            QueryRequest::new("q").temperature(3.5),
        ] {
            let err = f.pipeline.query(request).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn test_bm25_alias_shares_keyword_cache_entry() {
        let f = fixture(answering("Keyword answer [1]."), true, None).await;
        f.pipeline
            .query(QueryRequest::new("term frequency").strategy("keyword"))
            .await
            .unwrap();
        let alias = f
            .pipeline
            .query(QueryRequest::new("term frequency").strategy("bm25"))
            .await
            .unwrap();
        assert!(alias.metadata.cached);
        assert_eq!(alias.metadata.strategy, Strategy::Keyword);
    }

    #[tokio::test]
    async fn test_hyde_searches_with_query_and_hypothesis() {
        let f = fixture(
            ScriptedBackend::with(|req| {
                if req.prompt.ends_with("Hypothetical Answer:") {
                    Ok("A hypothetical answer embeds well.".to_string())
                } else {
                    Ok("HyDE helps [1].".to_string())
                }
            }),
            true,
            None,
        )
        .await;
        let pipeline = f.pipeline.with_enhancer(Arc::new(QueryEnhancer::new(
            f.backend.clone() as Arc<dyn GenerationBackend>,
        )));

        let response = pipeline
            .query(QueryRequest::new("What is HyDE?").strategy("hyde"))
            .await
            .unwrap();
        assert_eq!(
            response.metadata.enhanced_query.as_deref(),
            Some("What is HyDE?\n\nA hypothetical answer embeds well.")
        );
        assert_eq!(f.backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_enhancement_falls_back() {
        let f = fixture(
            ScriptedBackend::with(|req| {
                if req.prompt.ends_with("Rewritten:") {
                    Err(AppError::backend_unavailable("llm", "rewrite model down"))
                } else {
                    Ok("Answer [1].".to_string())
                }
            }),
            true,
            None,
        )
        .await;
        let pipeline = f
            .pipeline
            .with_enhancer(Arc::new(QueryEnhancer::new(
                f.backend.clone() as Arc<dyn GenerationBackend>,
            )))
            .with_settings(PipelineSettings::default());

        let response = pipeline
            .query(QueryRequest::new("What is RRF?").strategy("semantic"))
            .await
            .unwrap();
        assert!(response.metadata.enhanced_query.is_none());
        assert_eq!(response.metadata.degradations, vec![ENHANCEMENT_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_compare_strategies_isolates_failures() {
        let f = fixture(answering("Compared [1]."), true, Some(Arc::new(BrokenKeyword))).await;

        let names: Vec<String> = ["semantic", "keyword", "hybrid"].iter().map(|s| s.to_string()).collect();
        let comparison = f.pipeline.compare_strategies("What is HyDE?", &names, 2).await;

        assert_eq!(comparison.top_k, 2);
        assert_eq!(comparison.strategies.len(), 3);
        assert!(comparison.strategies["semantic"].is_success());
        assert!(comparison.strategies["hybrid"].is_success());
        match &comparison.strategies["keyword"] {
            StrategyResult::Failed { code, error } => {
                assert_eq!(*code, ErrorCode::BackendUnavailable);
                assert!(error.contains("index offline"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        if let StrategyResult::Success { response, .. } = &comparison.strategies["hybrid"] {
            assert!(response.metadata.degradations.contains(&"keyword_failed".to_string()));
            assert!(!response.metadata.cached);
        }

        // Comparisons never populate the cache
        let after = f.pipeline.query(QueryRequest::new("What is HyDE?").strategy("semantic").top_k(2)).await.unwrap();
        assert!(!after.metadata.cached);
    }

    #[tokio::test]
    async fn test_compare_runs_strategies_concurrently() {
        let backend = Arc::new(ScriptedBackend::replying("Fused [1].").delayed(Duration::from_millis(50)));
        let pipeline = keyword_pipeline(backend.clone());

        let names: Vec<String> = ["keyword", "hybrid", "semantic"].iter().map(|s| s.to_string()).collect();
        let comparison = tokio_test::assert_ok!(
            tokio::time::timeout(
                Duration::from_secs(5),
                pipeline.compare_strategies("rank fusion", &names, 2),
            )
            .await
        );

        assert!(comparison.strategies.values().all(|r| r.is_success()));
        assert_eq!(backend.calls(), 3);
        // Every generation was in flight at once, not one after another
        assert_eq!(backend.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_compare_reports_unknown_strategy() {
        let f = fixture(answering("ok [1]."), true, None).await;
        let names = vec!["hybrid".to_string(), "magic".to_string()];
        let comparison = f.pipeline.compare_strategies("q", &names, 1).await;
        assert!(comparison.strategies["hybrid"].is_success());
        assert!(matches!(
            comparison.strategies["magic"],
            StrategyResult::Failed { code: ErrorCode::InvalidStrategy, .. }
        ));
    }
}
