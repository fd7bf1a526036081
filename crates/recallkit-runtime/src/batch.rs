//! Batch pipeline: split inputs into fixed-size chunks, run one call per
//! chunk, and reassemble outputs in input order.
//!
//! Chunks run sequentially unless a concurrency limit above 1 is set. Either
//! way the result is all-or-nothing: the first failing chunk (in input
//! order) aborts the run and its index is reported.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use recallkit_core::{CoreConfig, Error, Result, DEFAULT_BATCH_SIZE};

/// Chunked, order-preserving executor for batch collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPipeline {
    batch_size: usize,
    max_concurrency: usize,
}

impl Default for BatchPipeline {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: 1,
        }
    }
}

impl BatchPipeline {
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be at least 1".into()));
        }
        Ok(Self {
            batch_size,
            max_concurrency: 1,
        })
    }

    /// Allow up to `max_concurrency` chunk calls in flight (minimum 1).
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        Ok(Self::new(config.batch_size)?.with_concurrency(config.batch_concurrency))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `call` once per chunk of `items` and concatenate the outputs.
    ///
    /// `call` must return exactly one output per input, in order. A chunk
    /// error, or a chunk returning the wrong number of outputs, fails the
    /// whole run with `Error::ChunkFailure`.
    pub async fn process<'a, I, O, F, Fut>(&self, items: &'a [I], call: F) -> Result<Vec<O>>
    where
        F: Fn(&'a [I]) -> Fut,
        Fut: Future<Output = Result<Vec<O>>>,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_count = items.len().div_ceil(self.batch_size);
        info!(
            items = items.len(),
            chunks = chunk_count,
            batch_size = self.batch_size,
            concurrency = self.max_concurrency,
            "Starting batch run"
        );

        let call = &call;
        let outputs: Vec<Vec<O>> = stream::iter(items.chunks(self.batch_size).enumerate())
            .map(|(index, chunk)| async move {
                let outputs = call(chunk).await.map_err(|e| {
                    warn!(chunk = index, error = %e, "Batch chunk failed");
                    Error::chunk(index, e)
                })?;

                if outputs.len() != chunk.len() {
                    warn!(
                        chunk = index,
                        expected = chunk.len(),
                        actual = outputs.len(),
                        "Batch chunk returned wrong number of outputs"
                    );
                    return Err(Error::chunk(
                        index,
                        Error::OutputLength {
                            expected: chunk.len(),
                            actual: outputs.len(),
                        },
                    ));
                }

                debug!(chunk = index, size = chunk.len(), "Batch chunk complete");
                Ok(outputs)
            })
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        Ok(outputs.into_iter().flatten().collect())
    }
}

/// Sequentially process `items` in chunks of `batch_size`.
pub async fn process_in_batches<'a, I, O, F, Fut>(
    items: &'a [I],
    batch_size: usize,
    call: F,
) -> Result<Vec<O>>
where
    F: Fn(&'a [I]) -> Fut,
    Fut: Future<Output = Result<Vec<O>>>,
{
    BatchPipeline::new(batch_size)?.process(items, call).await
}
