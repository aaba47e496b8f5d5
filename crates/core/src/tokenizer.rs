//! Token estimation.
//!
//! A precise subword tokenizer is used when one is available; otherwise the
//! estimate falls back to a character ratio. The ratio is a heuristic, not a
//! precise count.

use tracing::debug;

use crate::error::TokenizerError;
use crate::CHARS_PER_TOKEN;

/// Trait for tokenization operations.
///
/// Implementors report failures instead of panicking so that the estimator
/// can fall back to the character approximation.
pub trait Tokenizer {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

// Blanket implementation for references to Tokenizers
impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        (*self).count_tokens(text)
    }

    fn name(&self) -> &'static str {
        (*self).name()
    }
}

/// Character-based approximate tokenizer (`ceil(len / chars_per_token)`).
///
/// Length is measured in UTF-16 code units, the same unit a page script sees
/// as the string length.
#[derive(Debug, Clone, Copy)]
pub struct CharApproxTokenizer {
    chars_per_token: usize,
}

impl CharApproxTokenizer {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Infallible form of [`Tokenizer::count_tokens`].
    pub fn approximate(&self, text: &str) -> usize {
        text.encode_utf16().count().div_ceil(self.chars_per_token)
    }
}

impl Default for CharApproxTokenizer {
    fn default() -> Self {
        Self::new(CHARS_PER_TOKEN)
    }
}

impl Tokenizer for CharApproxTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.approximate(text))
    }

    fn name(&self) -> &'static str {
        "char-approx"
    }
}

/// cl100k_base BPE tokenizer, used for every platform.
#[cfg(feature = "tiktoken")]
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenTokenizer {
    pub fn cl100k() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| TokenizerError::Unavailable(e.to_string()))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }

    fn name(&self) -> &'static str {
        "cl100k_base"
    }
}

/// Turns arbitrary text into a non-negative token count. Never fails.
pub struct TokenEstimator {
    precise: Option<Box<dyn Tokenizer + Send + Sync>>,
    fallback: CharApproxTokenizer,
}

impl TokenEstimator {
    /// Estimator with no precise tokenizer.
    pub fn approximate(chars_per_token: usize) -> Self {
        Self {
            precise: None,
            fallback: CharApproxTokenizer::new(chars_per_token),
        }
    }

    /// Estimator preferring `precise`, falling back to the character ratio.
    pub fn with_tokenizer(
        precise: Box<dyn Tokenizer + Send + Sync>,
        chars_per_token: usize,
    ) -> Self {
        Self {
            precise: Some(precise),
            fallback: CharApproxTokenizer::new(chars_per_token),
        }
    }

    /// The best estimator this build supports.
    ///
    /// With the `tiktoken` feature this loads cl100k_base; if loading fails,
    /// or the feature is off, the character approximation is used.
    pub fn detect(chars_per_token: usize) -> Self {
        #[cfg(feature = "tiktoken")]
        {
            match TiktokenTokenizer::cl100k() {
                Ok(tokenizer) => return Self::with_tokenizer(Box::new(tokenizer), chars_per_token),
                Err(e) => debug!(error = %e, "precise tokenizer unavailable, using approximation"),
            }
        }
        Self::approximate(chars_per_token)
    }

    pub fn is_precise(&self) -> bool {
        self.precise.is_some()
    }

    pub fn estimate(&self, text: &str) -> usize {
        if let Some(tokenizer) = &self.precise {
            match tokenizer.count_tokens(text) {
                Ok(count) => return count,
                Err(e) => {
                    debug!(tokenizer = tokenizer.name(), error = %e, "falling back to character estimate");
                }
            }
        }
        self.fallback.approximate(text)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::approximate(CHARS_PER_TOKEN)
    }
}
