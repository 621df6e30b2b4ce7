//! Confidence scoring for single (vector, label) pairs.
//!
//! Three metrics are computed against the vector index, each tolerant of
//! query failure: k-NN label consistency, nearest same-class distance, and
//! distance to the class centroid. Failures inside a metric degrade to that
//! metric's sentinel value so the combined score stays total; they never
//! propagate past the scorer.

use std::sync::Arc;

use tracing::debug;

use crate::config::CleanerConfig;
use crate::constants::scoring::{CLASS_DISTANCE_CLAMP, DISTANCE_SENTINEL};
use crate::data::{CategoryResult, Decision, ValidationMetrics};
use crate::index::{Neighbor, VectorIndex};
use crate::stats::{ClassStatistics, ClassStatsCache};
use crate::types::Label;
use crate::vectors::euclidean_distance;

/// Error text for vectors that cannot be scored at all.
pub(crate) const INVALID_VECTOR_MSG: &str = "feature vector is empty or non-finite";

/// Returns `true` when a vector is non-empty and fully finite.
pub(crate) fn is_usable_vector(vector: &[f32]) -> bool {
    !vector.is_empty() && vector.iter().all(|value| value.is_finite())
}

/// Fraction of `neighbors` marked as members of `label`.
///
/// An empty neighbor set yields 0.0. Shared by the one-at-a-time and
/// batched validation paths so both compute the identical formula.
pub fn consistency_among(neighbors: &[Neighbor], label: &str) -> f32 {
    if neighbors.is_empty() {
        return 0.0;
    }
    let same = neighbors
        .iter()
        .filter(|neighbor| neighbor.metadata.has_label(label))
        .count();
    same as f32 / neighbors.len() as f32
}

/// Scores one (feature vector, candidate label) pair against the index.
pub struct LabelScorer {
    index: Arc<dyn VectorIndex>,
    stats: Arc<ClassStatsCache>,
    config: CleanerConfig,
}

impl LabelScorer {
    /// Create a scorer over `index` using `stats` for class lookups.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        stats: Arc<ClassStatsCache>,
        config: CleanerConfig,
    ) -> Self {
        Self {
            index,
            stats,
            config,
        }
    }

    /// The vector index this scorer queries.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// The class statistics cache this scorer consults.
    pub fn stats(&self) -> &Arc<ClassStatsCache> {
        &self.stats
    }

    /// The active configuration.
    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// k-NN label consistency `p`: fraction of the unfiltered `k` nearest
    /// neighbors carrying `label`. Query failure or an empty result yields 0.0.
    pub fn knn_consistency(&self, vector: &[f32], label: &str) -> f32 {
        match self
            .index
            .query_nearest(vector, self.config.k_neighbors, None)
        {
            Ok(neighbors) => consistency_among(&neighbors, label),
            Err(err) => {
                debug!(label = %label, error = %err, "knn consistency query failed");
                0.0
            }
        }
    }

    /// Normalized distance to the nearest same-class neighbor, clamped to
    /// [0, 1]. Missing neighbor or query failure yields the sentinel 1.0.
    pub fn nearest_same_class_distance(&self, vector: &[f32], label: &str) -> f32 {
        match self.index.query_nearest(vector, 1, Some(label)) {
            Ok(neighbors) => self.normalize_nearest_distance(neighbors.first()),
            Err(err) => {
                debug!(label = %label, error = %err, "nearest same-class query failed");
                DISTANCE_SENTINEL
            }
        }
    }

    /// Normalized distance from `vector` to the class centroid, clamped to
    /// [0, 3]. Classes with fewer than two members, degenerate intra-class
    /// distance, or a failed statistics lookup yield the sentinel 1.0.
    pub fn class_mean_distance(&self, vector: &[f32], label: &str) -> f32 {
        match self.stats.get(label) {
            Ok(stats) => self.normalized_mean_distance(vector, &stats),
            Err(err) => {
                debug!(label = %label, error = %err, "class statistics lookup failed");
                DISTANCE_SENTINEL
            }
        }
    }

    /// Apply the nearest-distance normalization to an optional batched hit.
    pub fn normalize_nearest_distance(&self, hit: Option<&Neighbor>) -> f32 {
        let Some(hit) = hit else {
            return DISTANCE_SENTINEL;
        };
        let normalized = hit.distance / self.config.reference_intra_distance;
        if normalized.is_finite() {
            normalized.clamp(0.0, 1.0)
        } else {
            DISTANCE_SENTINEL
        }
    }

    /// Apply the class-mean normalization for already-resolved statistics.
    pub fn normalized_mean_distance(&self, vector: &[f32], stats: &ClassStatistics) -> f32 {
        if stats.is_degenerate() {
            return DISTANCE_SENTINEL;
        }
        let normalized = euclidean_distance(vector, &stats.mean) / stats.mean_intra_distance;
        if normalized.is_finite() {
            normalized.clamp(0.0, CLASS_DISTANCE_CLAMP)
        } else {
            DISTANCE_SENTINEL
        }
    }

    /// Combined confidence score `S = w1·p − w2·d_min − w3·d_mu`.
    pub fn confidence_score(&self, metrics: &ValidationMetrics) -> f32 {
        let weights = &self.config.weights;
        weights.consistency * metrics.knn_consistency
            - weights.nearest_distance * metrics.nearest_distance
            - weights.class_distance * metrics.class_mean_distance
    }

    /// Threshold classification of a score.
    pub fn decide(&self, score: f32) -> Decision {
        if score >= self.config.thresholds.high {
            Decision::Accept
        } else if score <= self.config.thresholds.low {
            Decision::Reject
        } else {
            Decision::Review
        }
    }

    /// Validate one (vector, label) pair end to end.
    pub fn validate(&self, vector: &[f32], label: &str) -> CategoryResult {
        if !is_usable_vector(vector) {
            return CategoryResult::failed(label, INVALID_VECTOR_MSG);
        }
        let metrics = ValidationMetrics {
            knn_consistency: self.knn_consistency(vector, label),
            nearest_distance: self.nearest_same_class_distance(vector, label),
            class_mean_distance: self.class_mean_distance(vector, label),
        };
        self.result_from_metrics(label, metrics)
    }

    /// Turn computed metrics into a scored, decided [`CategoryResult`].
    pub fn result_from_metrics(
        &self,
        label: impl Into<Label>,
        metrics: ValidationMetrics,
    ) -> CategoryResult {
        let label = label.into();
        let score = self.confidence_score(&metrics);
        if !score.is_finite() {
            return CategoryResult::failed(label, "confidence score is not finite");
        }
        CategoryResult {
            label,
            decision: self.decide(score),
            score,
            metrics,
            error: None,
        }
    }
}
