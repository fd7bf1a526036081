//! Pairwise vector metrics.

use ndarray::ArrayView1;
use recallkit_core::{Error, Result};

fn check_dims(a: &ArrayView1<'_, f32>, b: &ArrayView1<'_, f32>) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Squared Euclidean distance; the metric `VectorIndex` ranks by.
pub fn squared_euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Result<f32> {
    check_dims(&a, &b)?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum())
}

/// Cosine similarity in `[-1, 1]`.
///
/// Returns 0.0 when either vector has (near) zero norm.
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Result<f32> {
    check_dims(&a, &b)?;
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a < 1e-9 || norm_b < 1e-9 {
        return Ok(0.0);
    }
    Ok(a.dot(&b) / (norm_a * norm_b))
}
