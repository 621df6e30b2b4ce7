use serde::{Deserialize, Serialize};

use crate::constants::scoring;

pub use crate::types::{FeatureVector, ImageId, ImagePath, Label};

/// One image record produced by upstream ingestion.
///
/// The label list preserves upstream order but is treated as a set during
/// validation; duplicates are validated once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Stable record identifier.
    pub id: ImageId,
    /// Path to the source image file.
    pub path: ImagePath,
    /// Candidate category labels assigned to this image (may be empty).
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Terminal outcome for a record or for a single validated label.
///
/// `Drop` is reserved for records that cannot even be attempted (missing
/// file) and is never produced by scoring; the other three are scoring
/// outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The label (or record) is trusted and kept.
    Accept,
    /// The label (or record) is untrusted and removed.
    Reject,
    /// Confidence is inconclusive; route to human review.
    Review,
    /// The record could not be processed at all.
    Drop,
}

/// Per-(record, label) metric values feeding the confidence score.
///
/// Values are always finite; failed metric computations are reported through
/// the documented sentinel values instead of propagating.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ValidationMetrics {
    /// Fraction of unfiltered nearest neighbors sharing the candidate label.
    pub knn_consistency: f32,
    /// Normalized distance to the nearest same-class neighbor, in [0, 1].
    pub nearest_distance: f32,
    /// Normalized distance to the class centroid, in [0, 3].
    pub class_mean_distance: f32,
}

impl ValidationMetrics {
    /// Metric values reported when validation fails before any metric is
    /// computed: zero consistency and maximal normalized distances.
    pub fn failure_sentinels() -> Self {
        Self {
            knn_consistency: 0.0,
            nearest_distance: scoring::DISTANCE_SENTINEL,
            class_mean_distance: scoring::DISTANCE_SENTINEL,
        }
    }
}

/// Validation outcome for one candidate label on one record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryResult {
    /// The validated label.
    pub label: Label,
    /// Scoring decision for this label.
    pub decision: Decision,
    /// Confidence score produced by the scoring formula.
    pub score: f32,
    /// The three metric values behind the score.
    pub metrics: ValidationMetrics,
    /// Failure description when validation degraded to the error path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CategoryResult {
    /// Result for a (vector, label) pair whose validation failed entirely.
    pub fn failed(label: impl Into<Label>, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            decision: Decision::Reject,
            score: scoring::FAILED_VALIDATION_SCORE,
            metrics: ValidationMetrics::failure_sentinels(),
            error: Some(reason.into()),
        }
    }
}

/// Final cleaning outcome for one input record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleaningResult {
    /// Identifier of the cleaned record.
    pub id: ImageId,
    /// Path of the cleaned record.
    pub path: ImagePath,
    /// Overall decision merged from the per-label decisions.
    pub decision: Decision,
    /// Mean of the per-label scores (0.0 when no label was scored).
    pub score: f32,
    /// Per-label validation outcomes, one per validated label.
    pub categories: Vec<CategoryResult>,
    /// Number of candidate labels carried by the record.
    pub total_categories: usize,
    /// Number of labels actually validated (allow-list intersection).
    pub validated_categories: usize,
    /// Record-level failure description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleaningResult {
    /// Terminal result for a record that cannot be attempted at all.
    pub fn dropped(record: &ImageRecord, reason: impl Into<String>) -> Self {
        Self::terminal(record, Decision::Drop, reason)
    }

    /// Terminal result for a record rejected before scoring.
    pub fn rejected(record: &ImageRecord, reason: impl Into<String>) -> Self {
        Self::terminal(record, Decision::Reject, reason)
    }

    fn terminal(record: &ImageRecord, decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            id: record.id.clone(),
            path: record.path.clone(),
            decision,
            score: scoring::FAILED_VALIDATION_SCORE,
            categories: Vec::new(),
            total_categories: record.labels.len(),
            validated_categories: 0,
            error: Some(reason.into()),
        }
    }
}
