//! Token counting with the cl100k_base BPE

use crate::errors::{AppError, Result};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Shared tokenizer used for prompt accounting and truncation
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Load the cl100k_base tokenizer
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| AppError::Configuration {
            message: format!("Failed to load cl100k_base tokenizer: {}", e),
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Count tokens in the given text
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Keep at most `max_tokens` tokens of `text`
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        match self.bpe.decode(tokens[..max_tokens].to_vec()) {
            Ok(decoded) => decoded,
            // Cut landed inside a multi-byte sequence; fall back to a character budget
            Err(_) => text.chars().take(max_tokens * 4).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count() {
        let counter = TokenCounter::new().unwrap();
        assert_eq!(counter.count(""), 0);
        assert!(counter.count("Reciprocal rank fusion combines rankings.") > 3);
    }

    #[test]
    fn test_truncate() {
        let counter = TokenCounter::new().unwrap();
        let text = "one two three four five six seven eight nine ten";
        assert_eq!(counter.truncate(text, 1000), text);

        let cut = counter.truncate(text, 3);
        assert_eq!(counter.count(&cut), 3);
        assert!(text.starts_with(&cut));
    }
}
