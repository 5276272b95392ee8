//! Citation-aware answer generation
//!
//! Provides:
//! - Prompt construction over a numbered context
//! - Inline `[N]` citation extraction
//! - Token accounting and cost estimation
//! - Context compression

use crate::context::Context;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::llm::{CompletionRequest, GenerationBackend, TextStream};
use ragforge_common::metrics;
use ragforge_common::tokens::TokenCounter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Inline citation marker: a positive integer without leading zeros in brackets
pub const CITATION_PATTERN: &str = r"\[([1-9][0-9]*)\]";

const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Price of one model in dollars per million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

/// Static per-model price table; unknown models are free
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let prices = [
            ("gpt-3.5-turbo", ModelPrice::new(0.50, 1.50)),
            ("gpt-4", ModelPrice::new(30.00, 60.00)),
            ("gpt-4-turbo", ModelPrice::new(10.00, 30.00)),
            ("claude-3-opus", ModelPrice::new(15.00, 75.00)),
            ("claude-3-sonnet", ModelPrice::new(3.00, 15.00)),
            ("claude-3-haiku", ModelPrice::new(0.25, 1.25)),
            ("gemini-pro", ModelPrice::new(0.0, 0.0)),
            ("gemini-1.5-flash", ModelPrice::new(0.0, 0.0)),
            ("mistralai/Mistral-7B-Instruct-v0.2", ModelPrice::new(0.0, 0.0)),
            ("meta-llama/Llama-2-7b-chat-hf", ModelPrice::new(0.0, 0.0)),
            ("google/flan-t5-large", ModelPrice::new(0.0, 0.0)),
        ];

        Self {
            prices: prices
                .into_iter()
                .map(|(model, price)| (model.to_string(), price))
                .collect(),
        }
    }
}

impl PriceTable {
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    pub fn price(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or_default()
    }

    /// Estimated dollars for a call, unrounded
    pub fn cost(&self, model: &str, input_tokens: usize, output_tokens: usize) -> f64 {
        let price = self.price(model);
        input_tokens as f64 / 1_000_000.0 * price.input_per_million
            + output_tokens as f64 / 1_000_000.0 * price.output_per_million
    }
}

/// Result of one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub answer: String,
    /// Ascending, deduplicated; not checked against the context size
    pub cited_indices: Vec<usize>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost: f64,
    pub latency: Duration,
    pub model: String,
}

impl GenerationResult {
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Every `[N]` marker in `text`, deduplicated and sorted ascending
pub fn extract_citations(text: &str) -> Vec<usize> {
    let Ok(pattern) = regex_lite::Regex::new(CITATION_PATTERN) else {
        return Vec::new();
    };

    pattern
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| m.as_str().parse::<usize>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Cited indices outside `1..=context_len`
///
/// Generation never applies this check itself.
pub fn validate_citations(cited: &[usize], context_len: usize) -> Vec<usize> {
    cited
        .iter()
        .copied()
        .filter(|&n| n == 0 || n > context_len)
        .collect()
}

/// Answer generator with inline citations
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    tokens: TokenCounter,
    prices: PriceTable,
    max_tokens: usize,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, tokens: TokenCounter, max_tokens: usize) -> Self {
        Self {
            backend,
            tokens,
            prices: PriceTable::default(),
            max_tokens,
        }
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model_name()
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokens.count(text)
    }

    /// Build the generation prompt
    pub fn build_prompt(question: &str, context: &Context) -> String {
        format!(
            "You are a helpful AI assistant. Answer the question based on the provided context.\n\n\
             IMPORTANT: Use inline citations in your answer. When referencing information from the context, \
             add [N] where N is the source number.\n\n\
             For example: \"Zero Knowledge Proofs allow verification without revealing information [2].\"\n\n\
             Context:\n{}\n\nQuestion: {}\n\nAnswer with citations:",
            context.render(),
            question
        )
    }

    fn request(&self, prompt: String, temperature: f32) -> CompletionRequest {
        CompletionRequest::new(prompt, self.max_tokens, temperature)
    }

    /// Generate an answer citing `context` entries as `[N]`
    pub async fn generate_with_citations(
        &self,
        question: &str,
        context: &Context,
        temperature: f32,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let prompt = Self::build_prompt(question, context);

        let answer = self
            .backend
            .complete(&self.request(prompt.clone(), temperature))
            .await
            .map_err(as_generation_failure)?;

        Ok(self.finish(&prompt, answer, start.elapsed()))
    }

    /// Start a streamed answer for a prompt built with [`Self::build_prompt`]
    pub async fn stream_answer(&self, prompt: &str, temperature: f32) -> Result<TextStream> {
        self.backend
            .complete_stream(&self.request(prompt.to_string(), temperature))
            .await
            .map_err(as_generation_failure)
    }

    /// Account for a finished answer: citations, tokens, cost and metrics
    pub fn finish(&self, prompt: &str, answer: String, latency: Duration) -> GenerationResult {
        let model = self.model().to_string();
        let input_tokens = self.tokens.count(prompt);
        let output_tokens = self.tokens.count(&answer);
        let cost = self.prices.cost(&model, input_tokens, output_tokens);
        let cited_indices = extract_citations(&answer);

        metrics::record_generation(latency.as_secs_f64(), &model, input_tokens, output_tokens, cost);
        debug!(
            model = %model,
            input_tokens,
            output_tokens,
            cost,
            citations = cited_indices.len(),
            "Generation complete"
        );

        GenerationResult {
            answer,
            cited_indices,
            input_tokens,
            output_tokens,
            cost,
            latency,
            model,
        }
    }

    /// Fit `text` into `max_tokens`, summarizing when it is over budget
    ///
    /// Falls back to hard truncation if summarization fails.
    pub async fn compress_context(&self, text: &str, max_tokens: usize) -> String {
        if self.tokens.count(text) <= max_tokens {
            return text.to_string();
        }

        let prompt = format!(
            "Summarize the following context, keeping the most important information.\n\
             Keep it under {} tokens while preserving key facts and details.\n\n\
             Context:\n{}\n\nCompressed Summary:",
            max_tokens, text
        );

        match self
            .backend
            .complete(&CompletionRequest::new(prompt, max_tokens, SUMMARY_TEMPERATURE))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Context summarization failed, truncating");
                self.tokens.truncate(text, max_tokens)
            }
        }
    }
}

pub(crate) fn as_generation_failure(err: AppError) -> AppError {
    match err {
        AppError::GenerationFailed { .. } => err,
        other => AppError::GenerationFailed {
            message: other.to_string(),
        },
    }
}
