//! Token counting for context budgeting
//!
//! Budgets must be measured with the same tokenizer the target model uses,
//! so the BPE counter is the default. The character estimate is kept for
//! models without a published encoding.

use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use crate::errors::{AppError, Result};

/// Counts model tokens in a piece of text
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Name of the encoding, for logs
    fn name(&self) -> &str;
}

/// BPE token counter backed by tiktoken
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
    encoding: String,
}

impl TiktokenCounter {
    /// Load one of the bundled encodings (`cl100k_base`, `o200k_base`)
    pub fn new(encoding: &str) -> Result<Self> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            other => {
                return Err(AppError::Configuration {
                    message: format!("unsupported tokenizer encoding '{other}'"),
                })
            }
        }
        .map_err(|e| AppError::Configuration {
            message: format!("failed to load {encoding} tokenizer: {e}"),
        })?;

        Ok(Self {
            bpe: Arc::new(bpe),
            encoding: encoding.to_string(),
        })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.encoding
    }
}

/// Rough estimate: 1 token ~= 4 characters
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateCounter;

impl TokenCounter for EstimateCounter {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn name(&self) -> &str {
        "estimate"
    }
}

/// Character-based estimate, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Create a token counter from the configured encoding name
pub fn create_token_counter(encoding: &str) -> Result<Arc<dyn TokenCounter>> {
    match encoding {
        "estimate" => Ok(Arc::new(EstimateCounter)),
        other => Ok(Arc::new(TiktokenCounter::new(other)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_tiktoken_counts_words() {
        let counter = TiktokenCounter::new("cl100k_base").unwrap();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(counter.name(), "cl100k_base");
    }

    #[test]
    fn test_unknown_encoding_is_configuration_error() {
        let err = create_token_counter("p50k_nope").err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
