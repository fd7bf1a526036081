//! Embedding provider trait and its memoized wrapper.
//!
//! The `EmbeddingProvider` trait abstracts over a remote embedding service
//! (text → vector). `CachedEmbedder` puts a `MemoCache` in front of it so
//! identical `(text, model)` requests reach the provider at most once.

use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array1;
use recallkit_core::Result;
use tracing::debug;

use crate::cache::{CacheStats, MemoCache};
use crate::key::CacheKey;

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier; part of every cache key.
    fn model(&self) -> &str;

    /// Generate an embedding for a text string.
    async fn embed(&self, text: &str) -> Result<Array1<f32>>;

    /// Generate embeddings for a batch of texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Lower-case and collapse runs of whitespace into single spaces.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Embedding provider fronted by an exact-match LRU cache.
pub struct CachedEmbedder<P: ?Sized> {
    provider: Arc<P>,
    cache: MemoCache<CacheKey, Array1<f32>>,
}

impl<P> CachedEmbedder<P>
where
    P: EmbeddingProvider + ?Sized,
{
    pub fn new(provider: Arc<P>, cache_capacity: usize) -> Result<Self> {
        Ok(Self {
            provider,
            cache: MemoCache::new(cache_capacity)?,
        })
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Embed one text, consulting the cache first.
    ///
    /// The text is used as given; normalize beforehand if needed.
    pub async fn embed(&self, text: &str) -> Result<Array1<f32>> {
        let key = CacheKey::embedding(text, self.provider.model());
        let fingerprint = key.fingerprint();
        self.cache
            .call(key, || {
                debug!(key = %fingerprint, model = self.provider.model(), "Embedding cache miss");
                self.provider.embed(text)
            })
            .await
    }

    /// Embed several texts one after another, in input order.
    ///
    /// Repeats within `texts` are served from the cache.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}
