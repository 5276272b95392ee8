//! BM25 lexical search over an in-memory corpus snapshot
//!
//! The index is rebuilt wholesale: a new snapshot is built off to the side and
//! published with a single pointer swap, so readers see either the old or the
//! new corpus and never a partially built one.

use super::{KeywordBackend, RetrievalMode, RetrievedItem};
use parking_lot::RwLock;
use ragforge_common::errors::Result;
use ragforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A document as seen by the keyword index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordDocument {
    pub id: String,
    pub text: String,
    pub source: Option<String>,
    pub page: Option<u32>,
}

impl KeywordDocument {
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
}

/// BM25 parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Length normalisation
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Whitespace split with case folding; punctuation clinging to a word is dropped.
/// No stemming.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Immutable, fully built index state
struct Bm25Snapshot {
    documents: Vec<KeywordDocument>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Snapshot {
    fn empty() -> Self {
        Self::build(Vec::new())
    }

    fn build(documents: Vec<KeywordDocument>) -> Self {
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in &documents {
            let tokens = tokenize(&doc.text);
            doc_lens.push(tokens.len());

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let n = documents.len() as f64;
        let avg_doc_len = if documents.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / n
        };

        // Lucene-style idf stays positive even for terms present in every document
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                (term, (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        Self {
            documents,
            term_freqs,
            doc_lens,
            avg_doc_len,
            idf,
        }
    }

    fn score_all(&self, query: &str, params: Bm25Params) -> Vec<f64> {
        let terms = tokenize(query);
        let mut scores = vec![0.0; self.documents.len()];
        if terms.is_empty() || self.documents.is_empty() {
            return scores;
        }

        for term in &terms {
            let Some(idf) = self.idf.get(term) else {
                continue;
            };
            for (i, tf) in self.term_freqs.iter().enumerate() {
                let Some(&freq) = tf.get(term) else {
                    continue;
                };
                let freq = freq as f64;
                let len_norm = if self.avg_doc_len > 0.0 {
                    self.doc_lens[i] as f64 / self.avg_doc_len
                } else {
                    1.0
                };
                scores[i] += idf * (freq * (params.k1 + 1.0))
                    / (freq + params.k1 * (1.0 - params.b + params.b * len_norm));
            }
        }

        scores
    }

    /// (document index, score) sorted descending; the stable sort keeps insertion order on ties
    fn ranked(&self, query: &str, params: Bm25Params) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = self.score_all(query, params).into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// In-memory BM25 keyword index
pub struct KeywordIndex {
    snapshot: RwLock<Arc<Bm25Snapshot>>,
    params: Bm25Params,
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl KeywordIndex {
    /// Create an empty index
    pub fn new(params: Bm25Params) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Bm25Snapshot::empty())),
            params,
        }
    }

    /// Replace the indexed corpus
    ///
    /// Concurrent `score` calls keep using the previous snapshot until the swap.
    pub fn build(&self, corpus: Vec<KeywordDocument>) {
        let snapshot = Arc::new(Bm25Snapshot::build(corpus));
        let documents = snapshot.documents.len();
        *self.snapshot.write() = snapshot;

        metrics::record_keyword_index(documents);
        info!(documents, "Keyword index rebuilt");
    }

    fn current(&self) -> Arc<Bm25Snapshot> {
        self.snapshot.read().clone()
    }

    /// Score every document, best first; ties keep corpus order
    pub fn score(&self, query: &str) -> Vec<(String, f64)> {
        let snapshot = self.current();
        snapshot
            .ranked(query, self.params)
            .into_iter()
            .map(|(i, score)| (snapshot.documents[i].id.clone(), score))
            .collect()
    }

    /// Number of documents in the published snapshot
    pub fn len(&self) -> usize {
        self.current().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeywordBackend for KeywordIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedItem>> {
        let snapshot = self.current();

        let items = snapshot
            .ranked(query, self.params)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .take(limit)
            .enumerate()
            .map(|(rank, (i, score))| {
                let doc = &snapshot.documents[i];
                RetrievedItem {
                    id: doc.id.clone(),
                    content: doc.text.clone(),
                    score,
                    source: doc.source.clone(),
                    page: doc.page,
                    rank_in_source: rank,
                    retrieval_mode: RetrievalMode::Keyword,
                }
            })
            .collect();

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<KeywordDocument> {
        vec![
            KeywordDocument::new("a", "Rust ownership and borrowing rules").with_source("rust.md"),
            KeywordDocument::new("b", "Reciprocal rank fusion merges ranked lists"),
            KeywordDocument::new("c", "BM25 ranks documents by term overlap with the query"),
            KeywordDocument::new("d", "Fusion of lists: reciprocal rank fusion again"),
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  What is RRF? "), vec!["what", "is", "rrf"]);
        assert_eq!(tokenize("..."), Vec::<String>::new());
    }

    #[test]
    fn test_empty_index_scores_nothing() {
        let index = KeywordIndex::default();
        assert!(index.score("anything").is_empty());
        assert!(index.search("anything", 5).unwrap().is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_scores_sorted_descending() {
        let index = KeywordIndex::default();
        index.build(corpus());

        let scores = index.score("reciprocal rank fusion");
        assert_eq!(scores.len(), 4);
        for pair in scores.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        assert!(scores[0].0 == "b" || scores[0].0 == "d");
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = KeywordIndex::default();
        index.build(vec![
            KeywordDocument::new("x", "alpha beta"),
            KeywordDocument::new("y", "gamma delta"),
            KeywordDocument::new("z", "alpha beta"),
        ]);
        let scores = index.score("alpha");
        assert_eq!(scores[0].0, "x");
        assert_eq!(scores[1].0, "z");
        assert_eq!(scores[0].1, scores[1].1);
        assert_eq!(scores[2], ("y".to_string(), 0.0));
    }

    #[test]
    fn test_search_excludes_zero_scores() {
        let index = KeywordIndex::default();
        index.build(corpus());

        let hits = index.search("ownership", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].source_label(), "rust.md");
        assert_eq!(hits[0].retrieval_mode, RetrievalMode::Keyword);

        let hits = index.search("fusion", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rank_in_source, 0);
    }

    #[test]
    fn test_single_document_corpus_matches() {
        let index = KeywordIndex::default();
        index.build(vec![KeywordDocument::new("only", "solitary document text")]);
        let hits = index.search("document", 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_rebuild_replaces_corpus() {
        let index = KeywordIndex::default();
        index.build(corpus());
        index.build(vec![KeywordDocument::new("n", "brand new corpus")]);
        assert_eq!(index.len(), 1);
        assert!(index.search("fusion", 5).unwrap().is_empty());
        assert_eq!(index.search("corpus", 5).unwrap()[0].id, "n");
    }

    #[test]
    fn test_readers_see_whole_snapshots_during_rebuild() {
        let index = Arc::new(KeywordIndex::default());
        let old: Vec<KeywordDocument> = (0..50)
            .map(|i| KeywordDocument::new(format!("old-{}", i), "shared term old"))
            .collect();
        let new: Vec<KeywordDocument> = (0..80)
            .map(|i| KeywordDocument::new(format!("new-{}", i), "shared term new"))
            .collect();
        index.build(old.clone());

        let writer = {
            let index = index.clone();
            std::thread::spawn(move || {
                for round in 0..20 {
                    index.build(if round % 2 == 0 { new.clone() } else { old.clone() });
                }
            })
        };

        for _ in 0..200 {
            let hits = index.search("shared", 200).unwrap();
            let olds = hits.iter().filter(|h| h.id.starts_with("old-")).count();
            let news = hits.iter().filter(|h| h.id.starts_with("new-")).count();
            assert!((olds == 50 && news == 0) || (olds == 0 && news == 80));
        }

        writer.join().unwrap();
    }
}
