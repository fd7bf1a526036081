//! Exact nearest-neighbor index over fixed-dimension vectors.
//!
//! Vectors are stacked into an `(n, dim)` matrix at build time. Search is a
//! brute-force scan under squared Euclidean distance, so results are exact.
//! The index is immutable; rebuilding is the only way to change its contents.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use recallkit_core::{Error, Result};
use serde::Serialize;
use tracing::{debug, info};

/// One search result: a row handle and its squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub distance: f32,
    /// Position of the vector in the build input.
    pub handle: usize,
}

/// Substitution boundary for nearest-neighbor backends.
pub trait NearestNeighborIndex: Send + Sync {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `min(k, len)` nearest vectors to `query`, closest first.
    fn search(&self, query: ArrayView1<'_, f32>, k: usize) -> Result<Vec<Neighbor>>;
}

/// Flat L2 index backed by a dense matrix.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// (n_vectors, dimension)
    matrix: Array2<f32>,
}

impl VectorIndex {
    /// Build an index from `vectors`; handle `i` refers to `vectors[i]`.
    ///
    /// The first vector fixes the dimension. Fails on empty input, a
    /// zero-length first vector, or any vector of a different length.
    pub fn build(vectors: &[Array1<f32>]) -> Result<Self> {
        let first = vectors
            .first()
            .ok_or_else(|| Error::EmptyInput("cannot build an index from zero vectors".into()))?;
        let dimension = first.len();
        if dimension == 0 {
            return Err(Error::InvalidArgument(
                "vectors must have at least one component".into(),
            ));
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let mut matrix = Array2::zeros((vectors.len(), dimension));
        for (mut row, vector) in matrix.rows_mut().into_iter().zip(vectors) {
            row.assign(vector);
        }

        info!(
            vectors = vectors.len(),
            dimension, "Built vector index"
        );
        Ok(Self { matrix })
    }

    /// Stored vector for `handle`, if it exists.
    pub fn vector(&self, handle: usize) -> Option<ArrayView1<'_, f32>> {
        (handle < self.matrix.nrows()).then(|| self.matrix.row(handle))
    }

    /// Squared distances from `query` to every stored vector, by handle.
    fn distances(&self, query: ArrayView1<'_, f32>) -> Array1<f32> {
        let mut diff = &self.matrix - &query.insert_axis(Axis(0));
        diff.mapv_inplace(|v| v * v);
        diff.sum_axis(Axis(1))
    }
}

/// Ascending distance, lower handle first on ties.
fn rank(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.handle.cmp(&b.handle))
}

impl NearestNeighborIndex for VectorIndex {
    fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    fn len(&self) -> usize {
        self.matrix.nrows()
    }

    fn search(&self, query: ArrayView1<'_, f32>, k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        if query.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .distances(query)
            .iter()
            .enumerate()
            .map(|(handle, &distance)| Neighbor { distance, handle })
            .collect();

        let k = k.min(neighbors.len());
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, rank);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(rank);

        debug!(k, scanned = self.len(), "Vector search");
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> VectorIndex {
        VectorIndex::build(&[
            array![0.0, 0.0],
            array![1.0, 0.0],
            array![0.0, 3.0],
            array![5.0, 5.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_exact_match_is_nearest() {
        let index = sample();
        let hits = index.search(array![1.0, 0.0].view(), 2).unwrap();
        assert_eq!(hits[0], Neighbor { distance: 0.0, handle: 1 });
        assert_eq!(hits[1].handle, 0);
        assert_eq!(hits[1].distance, 1.0);
    }

    #[test]
    fn test_results_sorted_ascending() {
        let index = sample();
        let hits = index.search(array![0.0, 0.0].view(), 4).unwrap();
        let handles: Vec<usize> = hits.iter().map(|n| n.handle).collect();
        assert_eq!(handles, vec![0, 1, 2, 3]);
        let distances: Vec<f32> = hits.iter().map(|n| n.distance).collect();
        assert_eq!(distances, vec![0.0, 1.0, 9.0, 50.0]);
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = sample();
        assert_eq!(index.search(array![0.0, 0.0].view(), 100).unwrap().len(), 4);
    }

    #[test]
    fn test_ties_prefer_lower_handle() {
        let index = VectorIndex::build(&[
            array![2.0, 0.0],
            array![-1.0, 0.0],
            array![1.0, 0.0],
            array![0.0, 1.0],
        ])
        .unwrap();
        // Handles 1, 2 and 3 are all at distance 1 from the origin
        let hits = index.search(array![0.0, 0.0].view(), 2).unwrap();
        assert_eq!(hits.iter().map(|n| n.handle).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_vectors_both_returned() {
        let index = VectorIndex::build(&[array![1.0, 1.0], array![1.0, 1.0]]).unwrap();
        let hits = index.search(array![1.0, 1.0].view(), 2).unwrap();
        assert_eq!(hits[0], Neighbor { distance: 0.0, handle: 0 });
        assert_eq!(hits[1], Neighbor { distance: 0.0, handle: 1 });
    }

    #[test]
    fn test_build_errors() {
        assert!(matches!(VectorIndex::build(&[]), Err(Error::EmptyInput(_))));
        assert!(matches!(
            VectorIndex::build(&[Array1::zeros(0)]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            VectorIndex::build(&[array![1.0, 2.0], array![1.0, 2.0, 3.0]]),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_search_errors() {
        let index = sample();
        assert!(matches!(
            index.search(array![1.0, 2.0, 3.0].view(), 1),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            index.search(array![1.0, 2.0].view(), 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_repeated_search_is_stable() {
        let index = sample();
        let q = array![0.4, 1.1];
        assert_eq!(
            index.search(q.view(), 3).unwrap(),
            index.search(q.view(), 3).unwrap()
        );
    }

    #[test]
    fn test_accessors() {
        let index = sample();
        assert_eq!(index.dimension(), 2);
        assert_eq!(index.len(), 4);
        assert!(!index.is_empty());
        assert_eq!(index.vector(2).unwrap(), array![0.0, 3.0].view());
        assert!(index.vector(4).is_none());
    }
}
