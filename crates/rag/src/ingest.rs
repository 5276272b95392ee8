//! Corpus ingestion
//!
//! Accepts `(id, text, source, page)` documents, embeds them into the vector
//! index when one is available, and republishes the keyword index from the full
//! corpus so both backends reflect the new documents once `ingest` returns.

use ragforge_common::embeddings::Embedder;
use ragforge_common::errors::{AppError, Result};
use ragforge_search::retrieval::VectorRecord;
use ragforge_search::{KeywordDocument, KeywordIndex, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A pre-chunked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: None,
            page: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    fn to_keyword(&self) -> KeywordDocument {
        KeywordDocument {
            id: self.id.clone(),
            text: self.text.clone(),
            source: self.source.clone(),
            page: self.page,
        }
    }
}

/// Summary of one ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub inserted: usize,
    pub replaced: usize,
    /// Documents written to the vector index
    pub embedded: usize,
    /// Why the vector index was not updated, when it was not
    pub vector_skipped: Option<String>,
    pub corpus_size: usize,
    pub duration_ms: f64,
}

/// Keeps the corpus and both indexes in step
pub struct Ingestor {
    corpus: Mutex<Vec<Document>>,
    embedder: Arc<dyn Embedder>,
    vector: Option<Arc<dyn VectorIndex>>,
    keyword: Arc<KeywordIndex>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Option<Arc<dyn VectorIndex>>,
        keyword: Arc<KeywordIndex>,
    ) -> Self {
        Self {
            corpus: Mutex::new(Vec::new()),
            embedder,
            vector,
            keyword,
            batch_size: 32,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn corpus_size(&self) -> usize {
        self.corpus.lock().await.len()
    }

    /// Add or replace documents and refresh both indexes
    ///
    /// Ingestions are serialized; queries keep reading the previous keyword
    /// snapshot until the rebuild is published.
    pub async fn ingest(&self, docs: Vec<Document>) -> Result<IngestReport> {
        let start = Instant::now();

        if let Some(bad) = docs.iter().find(|d| d.id.trim().is_empty() || d.text.trim().is_empty()) {
            return Err(AppError::Validation {
                message: format!("Document '{}' needs a non-empty id and text", bad.id),
                field: Some(if bad.id.trim().is_empty() { "id" } else { "text" }.to_string()),
            });
        }

        // Later duplicates in one batch win
        let mut batch: Vec<Document> = Vec::with_capacity(docs.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for doc in docs.iter().cloned() {
            match seen.get(&doc.id) {
                Some(&i) => batch[i] = doc,
                None => {
                    seen.insert(doc.id.clone(), batch.len());
                    batch.push(doc);
                }
            }
        }

        let mut report = IngestReport {
            received: docs.len(),
            ..IngestReport::default()
        };

        let mut corpus = self.corpus.lock().await;

        let positions: HashMap<String, usize> = corpus
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        for doc in &batch {
            match positions.get(&doc.id) {
                Some(&i) => {
                    corpus[i] = doc.clone();
                    report.replaced += 1;
                }
                None => {
                    corpus.push(doc.clone());
                    report.inserted += 1;
                }
            }
        }

        match self.index_vectors(&batch).await {
            Ok(embedded) => report.embedded = embedded,
            Err(reason) => {
                warn!(reason = %reason, "Vector index not updated");
                report.vector_skipped = Some(reason);
            }
        }

        self.keyword
            .build(corpus.iter().map(Document::to_keyword).collect());

        report.corpus_size = corpus.len();
        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            received = report.received,
            inserted = report.inserted,
            replaced = report.replaced,
            embedded = report.embedded,
            corpus_size = report.corpus_size,
            "Ingestion complete"
        );

        Ok(report)
    }

    async fn index_vectors(&self, batch: &[Document]) -> std::result::Result<usize, String> {
        let Some(index) = &self.vector else {
            return Err("no vector index configured".to_string());
        };

        let mut records = Vec::with_capacity(batch.len());
        for chunk in batch.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|d| d.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await.map_err(|e| e.to_string())?;

            if embeddings.len() != chunk.len() {
                return Err(format!(
                    "embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    chunk.len()
                ));
            }

            records.extend(chunk.iter().zip(embeddings).map(|(doc, embedding)| VectorRecord {
                id: doc.id.clone(),
                content: doc.text.clone(),
                embedding,
                source: doc.source.clone(),
                page: doc.page,
            }));
        }

        let embedded = records.len();
        index.upsert(records).await.map_err(|e| e.to_string())?;
        Ok(embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_common::embeddings::{DisabledEmbedder, HashEmbedder};
    use ragforge_search::retrieval::InMemoryVectorIndex;
    use ragforge_search::KeywordBackend;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a", "Reciprocal rank fusion merges rankings").with_source("rrf.md"),
            Document::new("b", "BM25 weighs term frequency").with_source("bm25.md").with_page(2),
        ]
    }

    #[tokio::test]
    async fn test_ingest_updates_both_indexes() {
        let vector = Arc::new(InMemoryVectorIndex::new(32));
        let keyword = Arc::new(KeywordIndex::default());
        let ingestor = Ingestor::new(
            Arc::new(HashEmbedder::new(32)),
            Some(vector.clone() as Arc<dyn VectorIndex>),
            keyword.clone(),
        )
        .with_batch_size(1);

        let report = ingestor.ingest(docs()).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.embedded, 2);
        assert!(report.vector_skipped.is_none());
        assert_eq!(vector.len().await.unwrap(), 2);
        assert_eq!(keyword.len(), 2);

        let hits = keyword.search("frequency", 5).unwrap();
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].page, Some(2));
    }

    #[tokio::test]
    async fn test_reingest_replaces_by_id() {
        let keyword = Arc::new(KeywordIndex::default());
        let ingestor = Ingestor::new(Arc::new(HashEmbedder::new(16)), None, keyword.clone());

        ingestor.ingest(docs()).await.unwrap();
        let report = ingestor
            .ingest(vec![
                Document::new("a", "Rewritten chunk about snapshots"),
                Document::new("c", "A new chunk"),
                Document::new("c", "A newer chunk"),
            ])
            .await
            .unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.corpus_size, 3);
        assert_eq!(report.vector_skipped.as_deref(), Some("no vector index configured"));
        assert!(keyword.search("fusion", 5).unwrap().is_empty());
        assert_eq!(keyword.search("snapshots", 5).unwrap()[0].id, "a");
        assert_eq!(keyword.search("newer", 5).unwrap()[0].id, "c");
    }

    #[tokio::test]
    async fn test_embedder_failure_still_indexes_keywords() {
        let keyword = Arc::new(KeywordIndex::default());
        let ingestor = Ingestor::new(
            Arc::new(DisabledEmbedder::new("no credentials")),
            Some(Arc::new(InMemoryVectorIndex::new(8)) as Arc<dyn VectorIndex>),
            keyword.clone(),
        );

        let report = ingestor.ingest(docs()).await.unwrap();
        assert_eq!(report.embedded, 0);
        assert!(report.vector_skipped.is_some());
        assert_eq!(keyword.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_empty_documents() {
        let ingestor = Ingestor::new(Arc::new(HashEmbedder::new(8)), None, Arc::new(KeywordIndex::default()));
        let err = ingestor.ingest(vec![Document::new("x", "  ")]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(ingestor.corpus_size().await, 0);
    }
}
