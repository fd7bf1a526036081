//! recallkit infer: token counting, call memoization, embedding seam.
//!
//! The `MemoCache` wraps any expensive remote call (embedding or
//! completion) behind an exact-match, LRU-bounded, coalescing cache.
//! `EmbeddingProvider` is the narrow interface to an embedding service;
//! `CachedEmbedder` puts the two together.

pub mod cache;
pub mod embedder;
pub mod key;
pub mod tokenizer;

pub use cache::{CacheStats, MemoCache};
pub use embedder::{normalize_text, CachedEmbedder, EmbeddingProvider};
pub use key::{CacheKey, KeyPart};
pub use tokenizer::{count_tokens, TiktokenCounter, TokenCounter};
