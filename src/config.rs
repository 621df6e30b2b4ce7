use serde::{Deserialize, Serialize};

use crate::constants::{cleaner, dispatch, scoring};
use crate::errors::CleanerError;
use crate::types::Label;

/// Weights applied to the three validation metrics when combining them into
/// a confidence score.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Weight of the k-NN label consistency term (`w1`, additive).
    pub consistency: f32,
    /// Weight of the nearest same-class distance term (`w2`, subtractive).
    pub nearest_distance: f32,
    /// Weight of the class mean distance term (`w3`, subtractive).
    pub class_distance: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            consistency: scoring::DEFAULT_CONSISTENCY_WEIGHT,
            nearest_distance: scoring::DEFAULT_NEAREST_DISTANCE_WEIGHT,
            class_distance: scoring::DEFAULT_CLASS_DISTANCE_WEIGHT,
        }
    }
}

/// Score thresholds separating accept, review, and reject outcomes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Scores at or above this value are accepted.
    pub high: f32,
    /// Scores at or below this value are rejected. Everything in between
    /// goes to human review.
    pub low: f32,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            high: scoring::DEFAULT_ACCEPT_THRESHOLD,
            low: scoring::DEFAULT_REJECT_THRESHOLD,
        }
    }
}

/// Top-level cleaning run configuration.
///
/// Worker parallelism is not configured here: the number of extraction
/// workers is however many are registered with the
/// [`ExtractionDispatcher`](crate::dispatch::ExtractionDispatcher);
/// `per_worker_batch_size` controls when a batch is split across them.
#[derive(Clone, Debug)]
pub struct CleanerConfig {
    /// Neighbor count `k` for the unfiltered k-NN consistency query.
    pub k_neighbors: usize,
    /// Fixed reference intra-class distance used to normalize the nearest
    /// same-class distance metric.
    pub reference_intra_distance: f32,
    /// Metric weights for the confidence score.
    pub weights: ScoreWeights,
    /// Accept/reject thresholds.
    pub thresholds: DecisionThresholds,
    /// Number of records handed to the dispatcher per driver batch.
    pub batch_size: usize,
    /// Allow-list restricting which labels are validated.
    ///
    /// Empty means every candidate label on a record is validated. When
    /// non-empty, a record's labels outside this list are skipped entirely;
    /// a record whose labels all fall outside the list is accepted outright.
    pub labels_of_interest: Vec<Label>,
    /// Batch size at or below which the dispatcher assigns the whole batch
    /// to a single worker instead of splitting it.
    pub per_worker_batch_size: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            k_neighbors: scoring::DEFAULT_K_NEIGHBORS,
            reference_intra_distance: scoring::DEFAULT_REFERENCE_INTRA_DISTANCE,
            weights: ScoreWeights::default(),
            thresholds: DecisionThresholds::default(),
            batch_size: cleaner::DEFAULT_BATCH_SIZE,
            labels_of_interest: Vec::new(),
            per_worker_batch_size: dispatch::DEFAULT_PER_WORKER_BATCH_SIZE,
        }
    }
}

impl CleanerConfig {
    /// Validate the configuration, consuming and returning it on success.
    ///
    /// Called at driver construction so invalid weights, thresholds, or
    /// sizes fail before any batch is processed.
    pub fn validated(self) -> Result<Self, CleanerError> {
        if self.k_neighbors == 0 {
            return Err(CleanerError::Configuration(
                "k_neighbors must be at least 1".into(),
            ));
        }
        if !(self.reference_intra_distance > 0.0) || !self.reference_intra_distance.is_finite() {
            return Err(CleanerError::Configuration(format!(
                "reference_intra_distance must be a positive finite value, got {}",
                self.reference_intra_distance
            )));
        }
        let weights = [
            self.weights.consistency,
            self.weights.nearest_distance,
            self.weights.class_distance,
        ];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(CleanerError::Configuration(
                "score weights must be finite".into(),
            ));
        }
        if !self.thresholds.high.is_finite() || !self.thresholds.low.is_finite() {
            return Err(CleanerError::Configuration(
                "decision thresholds must be finite".into(),
            ));
        }
        if self.thresholds.low > self.thresholds.high {
            return Err(CleanerError::Configuration(format!(
                "reject threshold {} exceeds accept threshold {}",
                self.thresholds.low, self.thresholds.high
            )));
        }
        if self.batch_size == 0 {
            return Err(CleanerError::Configuration(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.per_worker_batch_size == 0 {
            return Err(CleanerError::Configuration(
                "per_worker_batch_size must be at least 1".into(),
            ));
        }
        if self.labels_of_interest.iter().any(|label| label.is_empty()) {
            return Err(CleanerError::Configuration(
                "labels_of_interest must not contain empty labels".into(),
            ));
        }
        Ok(self)
    }
}
