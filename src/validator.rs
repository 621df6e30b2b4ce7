//! Batch validation: label grouping, batched index queries, and the
//! multi-label decision merge.
//!
//! Grouping same-label queries across a batch turns O(records × labels)
//! index round-trips into O(distinct labels) batched calls; the per-pair
//! metric formulas are shared with the one-at-a-time scorer so both paths
//! agree up to floating-point batching differences.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::CleanerConfig;
use crate::constants::cleaner::NO_LABEL_MSG;
use crate::constants::scoring::DISTANCE_SENTINEL;
use crate::data::{CategoryResult, CleaningResult, Decision, ImageRecord, ValidationMetrics};
use crate::index::VectorIndex;
use crate::scoring::{consistency_among, is_usable_vector, LabelScorer, INVALID_VECTOR_MSG};
use crate::stats::ClassStatsCache;
use crate::types::{FeatureVector, Label};

/// Merge per-label decisions into one record-level decision.
///
/// Strict priority order: reject over review over accept. Idempotent —
/// merging an already-merged decision with itself returns it unchanged. An
/// empty set merges to accept.
pub fn merge_decisions<I>(decisions: I) -> Decision
where
    I: IntoIterator<Item = Decision>,
{
    let mut overall = Decision::Accept;
    for decision in decisions {
        match decision {
            Decision::Reject | Decision::Drop => return Decision::Reject,
            Decision::Review => overall = Decision::Review,
            Decision::Accept => {}
        }
    }
    overall
}

/// Validates batches of (record, feature vector) pairs against the index.
pub struct BatchValidator {
    scorer: LabelScorer,
}

impl BatchValidator {
    /// Create a validator over `index`, sharing `stats` with the run.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        stats: Arc<ClassStatsCache>,
        config: CleanerConfig,
    ) -> Self {
        Self {
            scorer: LabelScorer::new(index, stats, config),
        }
    }

    /// The underlying single-pair scorer.
    pub fn scorer(&self) -> &LabelScorer {
        &self.scorer
    }

    /// Validate one record with its already-extracted feature vector.
    pub fn validate_one(&self, record: &ImageRecord, vector: &FeatureVector) -> CleaningResult {
        self.validate_batch(std::slice::from_ref(record), std::slice::from_ref(vector))
            .pop()
            .expect("single-record batch yields one result")
    }

    /// Validate a batch of records whose vectors were extracted in the same
    /// order. Output order matches input order.
    pub fn validate_batch(
        &self,
        records: &[ImageRecord],
        vectors: &[FeatureVector],
    ) -> Vec<CleaningResult> {
        debug_assert_eq!(records.len(), vectors.len());
        let len = records.len().min(vectors.len());
        let mut per_record: Vec<Vec<CategoryResult>> = (0..len).map(|_| Vec::new()).collect();
        let validation_sets: Vec<Vec<Label>> = records[..len]
            .iter()
            .map(|record| self.labels_to_validate(record))
            .collect();

        let mut groups: IndexMap<Label, Vec<usize>> = IndexMap::new();
        for (idx, labels) in validation_sets.iter().enumerate() {
            if labels.is_empty() {
                continue;
            }
            if !is_usable_vector(&vectors[idx]) {
                for label in labels {
                    per_record[idx].push(CategoryResult::failed(label.clone(), INVALID_VECTOR_MSG));
                }
                continue;
            }
            for label in labels {
                groups.entry(label.clone()).or_default().push(idx);
            }
        }

        // One eager statistics pass for the whole batch instead of a query
        // storm during scoring.
        self.scorer.stats().preload(groups.keys());

        for (label, members) in &groups {
            let queries: Vec<&[f32]> = members
                .iter()
                .map(|&idx| vectors[idx].as_slice())
                .collect();
            let k = self.scorer.config().k_neighbors;
            let knn_rows = self.scorer.index().query_nearest_batch(&queries, k, None);
            let same_rows = self
                .scorer
                .index()
                .query_nearest_batch(&queries, 1, Some(label.as_str()));
            if let Err(err) = &knn_rows {
                warn!(label = %label, error = %err, "batched knn query failed");
            }
            if let Err(err) = &same_rows {
                warn!(label = %label, error = %err, "batched same-class query failed");
            }
            debug!(
                label = %label,
                members = members.len(),
                "validated label group"
            );

            for (slot, &idx) in members.iter().enumerate() {
                let knn_consistency = match &knn_rows {
                    Ok(rows) => {
                        consistency_among(rows.get(slot).map(Vec::as_slice).unwrap_or(&[]), label)
                    }
                    Err(_) => 0.0,
                };
                let nearest_distance = match &same_rows {
                    Ok(rows) => self
                        .scorer
                        .normalize_nearest_distance(rows.get(slot).and_then(|row| row.first())),
                    Err(_) => DISTANCE_SENTINEL,
                };
                let class_mean_distance = self.scorer.class_mean_distance(&vectors[idx], label);
                let metrics = ValidationMetrics {
                    knn_consistency,
                    nearest_distance,
                    class_mean_distance,
                };
                per_record[idx].push(self.scorer.result_from_metrics(label.clone(), metrics));
            }
        }

        records[..len]
            .iter()
            .zip(per_record)
            .map(|(record, categories)| self.assemble(record, categories))
            .collect()
    }

    /// Labels requiring validation: the record's candidate labels
    /// intersected with the allow-list, order-preserving, duplicates
    /// validated once. An empty allow-list validates everything.
    fn labels_to_validate(&self, record: &ImageRecord) -> Vec<Label> {
        let allow = &self.scorer.config().labels_of_interest;
        let mut labels: Vec<Label> = Vec::new();
        for label in &record.labels {
            if labels.contains(label) {
                continue;
            }
            if allow.is_empty() || allow.contains(label) {
                labels.push(label.clone());
            }
        }
        labels
    }

    fn assemble(&self, record: &ImageRecord, categories: Vec<CategoryResult>) -> CleaningResult {
        let total_categories = record.labels.len();
        if total_categories == 0 {
            return CleaningResult {
                id: record.id.clone(),
                path: record.path.clone(),
                decision: Decision::Review,
                score: 0.0,
                categories: Vec::new(),
                total_categories: 0,
                validated_categories: 0,
                error: Some(NO_LABEL_MSG.to_string()),
            };
        }
        if categories.is_empty() {
            // Labels exist but the allow-list filtered them all out; those
            // labels are not this engine's concern, so the record passes.
            return CleaningResult {
                id: record.id.clone(),
                path: record.path.clone(),
                decision: Decision::Accept,
                score: 0.0,
                categories: Vec::new(),
                total_categories,
                validated_categories: 0,
                error: None,
            };
        }
        let decision = merge_decisions(categories.iter().map(|category| category.decision));
        let score =
            categories.iter().map(|category| category.score).sum::<f32>() / categories.len() as f32;
        CleaningResult {
            id: record.id.clone(),
            path: record.path.clone(),
            decision,
            score,
            validated_categories: categories.len(),
            categories,
            total_categories,
            error: None,
        }
    }
}
