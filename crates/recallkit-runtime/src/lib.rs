//! recallkit runtime: batch execution and retrieval flows.
//!
//! Ties the cache, embedding provider, and vector index together: texts
//! are embedded in order-preserving batches through the memoizing cache,
//! indexed, and searched.

pub mod batch;
pub mod retriever;

pub use batch::{process_in_batches, BatchPipeline};
pub use retriever::{DocumentIndex, RetrievedDocument, Retriever};
