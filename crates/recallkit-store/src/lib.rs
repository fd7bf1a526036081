//! recallkit store: exact vector index and similarity metrics.

pub mod index;
pub mod similarity;

pub use index::{NearestNeighborIndex, Neighbor, VectorIndex};
pub use similarity::{cosine_similarity, squared_euclidean};
