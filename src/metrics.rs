use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::{CleaningResult, Decision};

/// Running decision counters accumulated batch by batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecisionCounts {
    /// Records whose overall decision was accept.
    pub accepted: usize,
    /// Records whose overall decision was reject.
    pub rejected: usize,
    /// Records routed to human review.
    pub review: usize,
    /// Records dropped before any scoring.
    pub dropped: usize,
    /// Records carrying a record-level error.
    pub errors: usize,
}

impl DecisionCounts {
    /// Fold one cleaning result into the counters.
    pub fn observe(&mut self, result: &CleaningResult) {
        match result.decision {
            Decision::Accept => self.accepted += 1,
            Decision::Reject => self.rejected += 1,
            Decision::Review => self.review += 1,
            Decision::Drop => self.dropped += 1,
        }
        if result.error.is_some() {
            self.errors += 1;
        }
    }

    /// Total number of observed records.
    pub fn total(&self) -> usize {
        self.accepted + self.rejected + self.review + self.dropped
    }
}

/// Run-level outcome counts and rates.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Total records processed.
    pub total: usize,
    /// Accepted record count.
    pub accepted: usize,
    /// Rejected record count.
    pub rejected: usize,
    /// Review record count.
    pub review: usize,
    /// Dropped record count.
    pub dropped: usize,
    /// Records carrying a record-level error.
    pub errors: usize,
    /// Accepted share of the run.
    pub accept_rate: f64,
    /// Rejected share of the run.
    pub reject_rate: f64,
    /// Review share of the run.
    pub review_rate: f64,
    /// Dropped share of the run.
    pub drop_rate: f64,
    /// When the summary was produced.
    pub generated_at: DateTime<Utc>,
}

impl RunSummary {
    /// Build a summary from accumulated counters.
    pub fn from_counts(counts: DecisionCounts) -> Self {
        let total = counts.total();
        let rate = |count: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            }
        };
        Self {
            total,
            accepted: counts.accepted,
            rejected: counts.rejected,
            review: counts.review,
            dropped: counts.dropped,
            errors: counts.errors,
            accept_rate: rate(counts.accepted),
            reject_rate: rate(counts.rejected),
            review_rate: rate(counts.review),
            drop_rate: rate(counts.dropped),
            generated_at: Utc::now(),
        }
    }
}

/// Summarize an already-materialized result list.
pub fn summarize(results: &[CleaningResult]) -> RunSummary {
    let mut counts = DecisionCounts::default();
    for result in results {
        counts.observe(result);
    }
    RunSummary::from_counts(counts)
}
