//! Pluggable token counting, backing `estimate_tokens()` (§4.3) and the
//! planner's token/cost estimate (§4.5).
//!
//! Kept close to the teacher's own `server/src/tokenizer.rs`: a `Tokenizer`
//! trait with a dependency-free `WordEstimateTokenizer` default and an
//! accurate `TiktokenTokenizer` behind the `tiktoken` feature.

use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &str;
    /// Whether this tokenizer's result is a genuine count or a best-effort
    /// approximation (spec §9, Open Question 2).
    fn best_effort(&self) -> bool;
}

/// Default: word-count x small constant (fast, no dependencies, always
/// best-effort — spec §9 "word-count approximation").
pub struct WordEstimateTokenizer;

const TOKENS_PER_WORD_NUMERATOR: usize = 4;
const TOKENS_PER_WORD_DENOMINATOR: usize = 3;

impl Tokenizer for WordEstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words * TOKENS_PER_WORD_NUMERATOR).div_ceil(TOKENS_PER_WORD_DENOMINATOR)
    }
    fn name(&self) -> &str {
        "word-estimate"
    }
    fn best_effort(&self) -> bool {
        true
    }
}

#[cfg(feature = "tiktoken")]
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenTokenizer {
    pub fn new() -> Self {
        Self { bpe: tiktoken_rs::cl100k_base().expect("cl100k_base tokenizer data") }
    }
}

#[cfg(feature = "tiktoken")]
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
    fn name(&self) -> &str {
        "tiktoken"
    }
    fn best_effort(&self) -> bool {
        false
    }
}

/// Pick a tokenizer for a model name. Recognized model families use an
/// accurate tokenizer when the `tiktoken` feature is enabled; unrecognized
/// names fall back to `WordEstimateTokenizer` (best-effort, per §9).
pub fn create_tokenizer(model: Option<&str>) -> Arc<dyn Tokenizer> {
    #[cfg(feature = "tiktoken")]
    {
        if let Some(model) = model {
            if model.contains("gpt") || model.contains("claude") {
                return Arc::new(TiktokenTokenizer::new());
            }
        }
    }
    let _ = model;
    Arc::new(WordEstimateTokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_estimate_is_best_effort() {
        let tok = WordEstimateTokenizer;
        assert!(tok.best_effort());
        assert_eq!(tok.count_tokens("one two three"), 4);
        assert_eq!(tok.count_tokens(""), 0);
    }
}
