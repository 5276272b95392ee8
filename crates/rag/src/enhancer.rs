//! Query enhancement through the generation backend
//!
//! Every method falls back to the original query when the backend fails, so
//! enhancement can never fail a query.

use ragforge_common::llm::{CompletionRequest, GenerationBackend};
use ragforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shortest rewrite accepted, in characters
const MIN_REWRITE_CHARS: usize = 10;

/// Longest rewrite accepted, as a multiple of the query length
const MAX_REWRITE_RATIO: usize = 3;

/// What happened to an enhancement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementOutcome {
    /// The backend output is used
    Applied,
    /// The backend answered but its output failed the sanity guard
    Rejected,
    /// The backend call failed
    Failed,
}

/// Enhanced text together with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Enhanced {
    pub text: String,
    pub outcome: EnhancementOutcome,
}

impl Enhanced {
    fn applied(text: String) -> Self {
        Self {
            text,
            outcome: EnhancementOutcome::Applied,
        }
    }

    fn fallback(query: &str, outcome: EnhancementOutcome) -> Self {
        Self {
            text: query.to_string(),
            outcome,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.outcome == EnhancementOutcome::Applied
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == EnhancementOutcome::Failed
    }
}

/// Search text for HyDE: the query followed by the hypothetical answer
pub fn hyde_search_text(query: &str, hypothetical: &str) -> String {
    format!("{}\n\n{}", query, hypothetical)
}

/// Strip list numbering and bullets from a generated line
fn strip_list_marker(line: &str) -> &str {
    line.trim_start_matches(|c: char| "123456789.-) ".contains(c))
}

fn parse_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| strip_list_marker(l).to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Query enhancer (rewrite, HyDE, expansion, decomposition)
pub struct QueryEnhancer {
    backend: Arc<dyn GenerationBackend>,
    hyde_max_tokens: usize,
    rewrite_max_tokens: usize,
}

impl QueryEnhancer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            hyde_max_tokens: 150,
            rewrite_max_tokens: 100,
        }
    }

    pub fn with_token_limits(mut self, hyde_max_tokens: usize, rewrite_max_tokens: usize) -> Self {
        self.hyde_max_tokens = hyde_max_tokens;
        self.rewrite_max_tokens = rewrite_max_tokens;
        self
    }

    async fn generate(&self, kind: &str, prompt: String, max_tokens: usize, temperature: f32) -> Option<String> {
        match self
            .backend
            .complete(&CompletionRequest::new(prompt, max_tokens, temperature))
            .await
        {
            Ok(response) => Some(response.trim().to_string()),
            Err(e) => {
                warn!(kind, error = %e, "Query enhancement failed, using original query");
                metrics::record_enhancement(kind, false);
                None
            }
        }
    }

    /// Produce a hypothetical answer to search with
    ///
    /// On failure the text is the original query.
    pub async fn hyde(&self, query: &str) -> Enhanced {
        let prompt = format!(
            "Given the following question, write a brief, factual answer (2-3 sentences) as if you were \
             answering from a knowledge base.\n\
             Don't say \"I don't know\" - make an educated guess based on the question.\n\n\
             Question: {}\n\nHypothetical Answer:",
            query
        );

        match self.generate("hyde", prompt, self.hyde_max_tokens, 0.7).await {
            Some(hypothetical) if !hypothetical.is_empty() => {
                metrics::record_enhancement("hyde", true);
                debug!(chars = hypothetical.len(), "HyDE answer generated");
                Enhanced::applied(hypothetical)
            }
            Some(_) => {
                metrics::record_enhancement("hyde", false);
                Enhanced::fallback(query, EnhancementOutcome::Rejected)
            }
            None => Enhanced::fallback(query, EnhancementOutcome::Failed),
        }
    }

    /// Rewrite the query for retrieval
    ///
    /// A rewrite shorter than 10 characters or longer than three times the query
    /// is rejected and the original query is kept.
    pub async fn rewrite(&self, query: &str) -> Enhanced {
        let prompt = format!(
            "Rewrite the following question to be clearer and more specific, while preserving the original intent.\n\
             Make it more suitable for semantic search.\n\n\
             Original: {}\n\nRewritten:",
            query
        );

        let Some(rewritten) = self.generate("rewrite", prompt, self.rewrite_max_tokens, 0.5).await else {
            return Enhanced::fallback(query, EnhancementOutcome::Failed);
        };

        let len = rewritten.chars().count();
        if len < MIN_REWRITE_CHARS || len > query.chars().count() * MAX_REWRITE_RATIO {
            debug!(len, "Rewrite rejected by length guard");
            metrics::record_enhancement("rewrite", false);
            return Enhanced::fallback(query, EnhancementOutcome::Rejected);
        }

        metrics::record_enhancement("rewrite", true);
        Enhanced::applied(rewritten)
    }

    /// The query followed by up to `num_queries - 1` alternative phrasings
    pub async fn multi_queries(&self, query: &str, num_queries: usize) -> Vec<String> {
        let wanted = num_queries.saturating_sub(1);
        if wanted == 0 {
            return vec![query.to_string()];
        }

        let prompt = format!(
            "Given the following question, generate {} alternative phrasings that ask for the same \
             information in different ways.\n\n\
             Original Question: {}\n\nAlternative Questions (one per line):",
            wanted, query
        );

        let mut queries = vec![query.to_string()];
        if let Some(response) = self.generate("multi_query", prompt, 200, 0.8).await {
            queries.extend(parse_lines(&response).into_iter().take(wanted));
            metrics::record_enhancement("multi_query", true);
        }
        queries
    }

    /// The query followed by generated keywords and synonyms
    pub async fn expand_with_keywords(&self, query: &str) -> String {
        let prompt = format!(
            "Given the following question, provide 5-7 relevant keywords and synonyms that would help find \
             related information.\n\n\
             Question: {}\n\nKeywords (comma-separated):",
            query
        );

        match self.generate("keywords", prompt, 100, 0.6).await {
            Some(keywords) => {
                metrics::record_enhancement("keywords", true);
                format!("{} {}", query, keywords)
            }
            None => query.to_string(),
        }
    }

    /// Simpler sub-questions; the original query alone when none are produced
    pub async fn decompose(&self, query: &str) -> Vec<String> {
        let prompt = format!(
            "Break down the following complex question into 2-4 simpler sub-questions that, when answered \
             together, would answer the original question.\n\n\
             Complex Question: {}\n\nSub-questions (one per line):",
            query
        );

        let sub_questions = self
            .generate("decompose", prompt, 200, 0.7)
            .await
            .map(|response| parse_lines(&response))
            .unwrap_or_default();

        if sub_questions.is_empty() {
            vec![query.to_string()]
        } else {
            metrics::record_enhancement("decompose", true);
            sub_questions
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedBackend;

    fn enhancer(backend: ScriptedBackend) -> QueryEnhancer {
        QueryEnhancer::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn test_rewrite_applied() {
        let e = enhancer(ScriptedBackend::replying("  How does reciprocal rank fusion work?  "));
        let out = e.rewrite("how does rrf work").await;
        assert!(out.is_applied());
        assert_eq!(out.text, "How does reciprocal rank fusion work?");
    }

    #[tokio::test]
    async fn test_rewrite_guard_rejects_short_and_long() {
        let short = enhancer(ScriptedBackend::replying("RRF?"));
        let out = short.rewrite("what is reciprocal rank fusion").await;
        assert_eq!(out.outcome, EnhancementOutcome::Rejected);
        assert_eq!(out.text, "what is reciprocal rank fusion");

        let long = enhancer(ScriptedBackend::replying(&"very long rewrite ".repeat(10)));
        let out = long.rewrite("what is bm25").await;
        assert_eq!(out.outcome, EnhancementOutcome::Rejected);
        assert_eq!(out.text, "what is bm25");
    }

    #[tokio::test]
    async fn test_rewrite_failure_keeps_query() {
        let e = enhancer(ScriptedBackend::failing("timeout"));
        let out = e.rewrite("what is bm25").await;
        assert!(out.is_failed());
        assert_eq!(out.text, "what is bm25");
    }

    #[tokio::test]
    async fn test_hyde() {
        let e = enhancer(ScriptedBackend::with(|req| {
            assert_eq!(req.max_tokens, 150);
            assert!(req.prompt.ends_with("Question: what is rrf\n\nHypothetical Answer:"));
            Ok("RRF sums reciprocal ranks.\n".to_string())
        }));
        let out = e.hyde("what is rrf").await;
        assert!(out.is_applied());
        assert_eq!(out.text, "RRF sums reciprocal ranks.");
        assert_eq!(
            hyde_search_text("what is rrf", &out.text),
            "what is rrf\n\nRRF sums reciprocal ranks."
        );

        let failing = enhancer(ScriptedBackend::failing("down"));
        let out = failing.hyde("what is rrf").await;
        assert!(out.is_failed());
        assert_eq!(out.text, "what is rrf");
    }

    #[tokio::test]
    async fn test_multi_queries() {
        let e = enhancer(ScriptedBackend::replying("1. First variant\n2) Second variant\n- Third variant\n"));
        let queries = e.multi_queries("original", 3).await;
        assert_eq!(queries, vec!["original", "First variant", "Second variant"]);

        let failing = enhancer(ScriptedBackend::failing("down"));
        assert_eq!(failing.multi_queries("original", 3).await, vec!["original"]);
    }

    #[tokio::test]
    async fn test_expand_and_decompose() {
        let e = enhancer(ScriptedBackend::replying("fusion, ranking, retrieval"));
        assert_eq!(
            e.expand_with_keywords("rrf").await,
            "rrf fusion, ranking, retrieval"
        );

        let d = enhancer(ScriptedBackend::replying("1. What is BM25?\n\n2. What is RRF?"));
        assert_eq!(d.decompose("compare bm25 and rrf").await, vec!["What is BM25?", "What is RRF?"]);

        let empty = enhancer(ScriptedBackend::replying("   "));
        assert_eq!(empty.decompose("q").await, vec!["q"]);
    }

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("3. item"), "item");
        assert_eq!(strip_list_marker("- item"), "item");
        assert_eq!(strip_list_marker("10) item"), "0) item");
    }
}
