//! Semantic retrieval: embed documents in batches, index them, and answer
//! nearest-neighbor queries with the original document text.

use std::sync::Arc;

use ndarray::Array1;
use serde::Serialize;
use tracing::{debug, info};

use recallkit_core::{CoreConfig, Error, Result};
use recallkit_infer::{normalize_text, CacheStats, CachedEmbedder, EmbeddingProvider};
use recallkit_store::{NearestNeighborIndex, VectorIndex};

use crate::batch::BatchPipeline;

/// A search hit resolved back to its document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub handle: usize,
    pub text: String,
    /// Squared L2 distance between query and document embeddings.
    pub distance: f32,
}

/// Documents paired with the index built over their embeddings.
pub struct DocumentIndex {
    index: Box<dyn NearestNeighborIndex>,
    documents: Vec<String>,
}

impl DocumentIndex {
    /// Pair an index with its documents; handle `i` must refer to
    /// `documents[i]`.
    pub fn new(index: Box<dyn NearestNeighborIndex>, documents: Vec<String>) -> Result<Self> {
        if index.len() != documents.len() {
            return Err(Error::InvalidArgument(format!(
                "index holds {} vectors but {} documents were given",
                index.len(),
                documents.len()
            )));
        }
        Ok(Self { index, documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn document(&self, handle: usize) -> Option<&str> {
        self.documents.get(handle).map(String::as_str)
    }

    /// Nearest documents to an already-embedded query.
    pub fn search_vector(&self, query: &Array1<f32>, k: usize) -> Result<Vec<RetrievedDocument>> {
        let neighbors = self.index.search(query.view(), k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                self.documents.get(n.handle).map(|text| RetrievedDocument {
                    handle: n.handle,
                    text: text.clone(),
                    distance: n.distance,
                })
            })
            .collect())
    }
}

/// Embeds through a memoizing cache in batches and searches the result.
pub struct Retriever<P: ?Sized> {
    embedder: CachedEmbedder<P>,
    pipeline: BatchPipeline,
    normalize: bool,
}

impl<P> Retriever<P>
where
    P: EmbeddingProvider + ?Sized,
{
    pub fn new(provider: Arc<P>, config: &CoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder: CachedEmbedder::new(provider, config.cache_capacity)?,
            pipeline: BatchPipeline::from_config(config)?,
            normalize: config.normalize_text,
        })
    }

    pub fn with_pipeline(mut self, pipeline: BatchPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn embedder(&self) -> &CachedEmbedder<P> {
        &self.embedder
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.embedder.cache_stats()
    }

    fn prepare(&self, text: &str) -> String {
        if self.normalize {
            normalize_text(text)
        } else {
            text.to_string()
        }
    }

    /// Embeddings for `texts` in input order, batched and cached.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        let prepared: Vec<String> = texts.iter().map(|t| self.prepare(t)).collect();
        self.pipeline
            .process(&prepared, |chunk| self.embedder.embed_all(chunk))
            .await
    }

    /// Embed `documents` and build a searchable index over them.
    pub async fn index_documents(&self, documents: &[String]) -> Result<DocumentIndex> {
        if documents.is_empty() {
            return Err(Error::EmptyInput("no documents to index".into()));
        }

        let embeddings = self.embed_all(documents).await?;
        let index = VectorIndex::build(&embeddings)?;
        info!(
            documents = documents.len(),
            dimension = index.dimension(),
            "Indexed documents"
        );
        DocumentIndex::new(Box::new(index), documents.to_vec())
    }

    /// The `k` documents closest to `query`.
    pub async fn search(
        &self,
        index: &DocumentIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let embedding = self.embedder.embed(&self.prepare(query)).await?;
        let hits = index.search_vector(&embedding, k)?;
        debug!(k, hits = hits.len(), "Semantic search");
        Ok(hits)
    }
}
