//! Token counting under a named model's tokenization scheme.
//!
//! Backed by tiktoken BPE tables. Encoders are built once per encoding
//! and shared between models that use the same one.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;
use tracing::debug;

use recallkit_core::{Error, Result};

/// Counts tokens for a text under a model's tokenizer.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text` for `model`.
    ///
    /// Fails with `UnsupportedModel` for unknown models rather than
    /// falling back to some other scheme.
    fn count_tokens(&self, text: &str, model: &str) -> Result<usize>;

    /// Sum of token counts over several texts.
    fn count_all(&self, texts: &[&str], model: &str) -> Result<usize> {
        texts
            .iter()
            .map(|t| self.count_tokens(t, model))
            .sum::<Result<usize>>()
    }
}

/// tiktoken-backed counter with a per-encoding encoder cache.
#[derive(Default)]
pub struct TiktokenCounter {
    encoders: Mutex<HashMap<Tokenizer, Arc<CoreBPE>>>,
}

static SHARED: Lazy<TiktokenCounter> = Lazy::new(TiktokenCounter::new);

impl TiktokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide counter; encoders are immutable so sharing is safe.
    pub fn shared() -> &'static TiktokenCounter {
        &SHARED
    }

    /// Whether `model` maps to a known encoding.
    pub fn supports(model: &str) -> bool {
        get_tokenizer(model).is_some()
    }

    fn encoder(&self, model: &str) -> Result<Arc<CoreBPE>> {
        let tokenizer =
            get_tokenizer(model).ok_or_else(|| Error::UnsupportedModel(model.to_string()))?;

        let mut encoders = self.encoders.lock();
        if let Some(bpe) = encoders.get(&tokenizer) {
            return Ok(bpe.clone());
        }

        let bpe = tiktoken_rs::get_bpe_from_tokenizer(tokenizer)
            .map_err(|e| Error::UnsupportedModel(format!("{}: {}", model, e)))?;
        debug!(model = %model, encoding = ?tokenizer, "Loaded BPE encoder");

        let bpe = Arc::new(bpe);
        encoders.insert(tokenizer, bpe.clone());
        Ok(bpe)
    }
}

impl TokenCounter for TiktokenCounter {
    /// Special-token markup such as `<|endoftext|>` is counted as the plain
    /// text it is, never as a single control token.
    fn count_tokens(&self, text: &str, model: &str) -> Result<usize> {
        let bpe = self.encoder(model)?;
        if text.is_empty() {
            return Ok(0);
        }
        Ok(bpe.encode_ordinary(text).len())
    }
}

/// Count tokens with the shared tiktoken counter.
pub fn count_tokens(text: &str, model: &str) -> Result<usize> {
    TiktokenCounter::shared().count_tokens(text, model)
}
