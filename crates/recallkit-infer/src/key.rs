//! Cache keys: explicit, ordered tuples of a call's significant parameters.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// One component of a cache key.
///
/// Floats are stored as raw bits so equality is exact (`0.7` and
/// `0.70000001` are different keys, as are `0.0` and `-0.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum KeyPart {
    Text(String),
    Int(i64),
    Float(u64),
    Absent,
}

/// Exact-match memoization key. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey {
    parts: Vec<KeyPart>,
}

impl CacheKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.parts.push(KeyPart::Text(value.into()));
        self
    }

    pub fn int(mut self, value: i64) -> Self {
        self.parts.push(KeyPart::Int(value));
        self
    }

    pub fn float(mut self, value: f64) -> Self {
        self.parts.push(KeyPart::Float(value.to_bits()));
        self
    }

    /// Optional integer; `None` is its own distinct component.
    pub fn opt_int(mut self, value: Option<i64>) -> Self {
        self.parts.push(value.map_or(KeyPart::Absent, KeyPart::Int));
        self
    }

    /// Key for an embedding call: `(text, model)`.
    pub fn embedding(text: &str, model: &str) -> Self {
        Self::new().text(text).text(model)
    }

    /// Key for a single-prompt completion call:
    /// `(prompt, model, temperature, max_tokens)`.
    pub fn completion(prompt: &str, model: &str, temperature: f32, max_tokens: Option<u32>) -> Self {
        Self::new()
            .text(prompt)
            .text(model)
            .float(f64::from(temperature))
            .opt_int(max_tokens.map(i64::from))
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Short hex digest for logs, so raw prompts never reach log output.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in &self.parts {
            match part {
                KeyPart::Text(s) => {
                    hasher.update([0u8]);
                    hasher.update((s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
                KeyPart::Int(i) => {
                    hasher.update([1u8]);
                    hasher.update(i.to_le_bytes());
                }
                KeyPart::Float(bits) => {
                    hasher.update([2u8]);
                    hasher.update(bits.to_le_bytes());
                }
                KeyPart::Absent => hasher.update([3u8]),
            }
        }
        hex::encode(&hasher.finalize()[..8])
    }
}
