//! Deterministic doubles for the pipeline's collaborators

use crate::generator::GenerationClient;
use crate::pipeline::RagPipeline;
use crate::tracker::QueryTracker;
use async_trait::async_trait;
use ragforge_common::cache::{MemoryCache, QueryCache};
use ragforge_common::embeddings::{Embedder, HashEmbedder};
use ragforge_common::errors::{AppError, Result};
use ragforge_common::llm::{CompletionRequest, GenerationBackend};
use ragforge_common::tokens::TokenCounter;
use ragforge_search::{HybridSearcher, KeywordBackend, KeywordDocument, KeywordIndex, RetrievedItem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

/// Generation backend answering from a closure and counting calls
pub(crate) struct ScriptedBackend {
    respond: Responder,
    calls: AtomicUsize,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn with(respond: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every completion for `delay` before answering
    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::with(move |_| Ok(text.clone()))
    }

    pub(crate) fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::with(move |_| {
            Err(AppError::backend_unavailable("llm", message.clone()))
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most completions observed running at the same time
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(request)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Hash embedder that counts calls
pub(crate) struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Keyword backend that always fails
pub(crate) struct BrokenKeyword;

impl KeywordBackend for BrokenKeyword {
    fn search(&self, _query: &str, _limit: usize) -> Result<Vec<RetrievedItem>> {
        Err(AppError::backend_unavailable("keyword", "index offline"))
    }
}

/// Keyword-only pipeline over a three-document corpus, with tracker and cache
pub(crate) fn keyword_pipeline(backend: Arc<ScriptedBackend>) -> RagPipeline {
    let keyword = Arc::new(KeywordIndex::default());
    keyword.build(vec![
        KeywordDocument::new("rrf", "Reciprocal rank fusion combines ranked lists.").with_source("rrf.md"),
        KeywordDocument::new("bm25", "BM25 ranks documents using term frequency and length.").with_source("bm25.md"),
        KeywordDocument::new("hyde", "HyDE embeds a hypothetical answer.").with_source("hyde.md"),
    ]);

    let searcher = HybridSearcher::new(Arc::new(HashEmbedder::new(16)), None, keyword);
    let generator = GenerationClient::new(
        backend,
        TokenCounter::new().expect("tokenizer"),
        256,
    );

    RagPipeline::new(Arc::new(searcher), Arc::new(generator))
        .with_tracker(Arc::new(QueryTracker::new()))
        .with_cache(QueryCache::new(
            Arc::new(MemoryCache::new(16)),
            "test",
            Duration::from_secs(60),
        ))
}
