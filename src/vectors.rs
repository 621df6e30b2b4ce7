//! Small vector-math helpers shared by statistics and scoring.

use crate::types::FeatureVector;

/// Euclidean distance between two vectors.
///
/// Dimensions are expected to match; trailing components of the longer
/// vector are ignored so the result stays finite on mismatched input.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f32>()
        .sqrt()
}

/// Scale a vector to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(vector: &[f32]) -> FeatureVector {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

/// Component-wise mean of a set of equal-dimension vectors.
///
/// Returns `None` for an empty set.
pub fn mean_vector(vectors: &[FeatureVector]) -> Option<FeatureVector> {
    let first = vectors.first()?;
    let mut mean = vec![0.0f32; first.len()];
    for vector in vectors {
        for (slot, value) in mean.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut mean {
        *slot /= count;
    }
    Some(mean)
}
