//! Per-label aggregate statistics and their run-lifetime cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::constants::scoring::MIN_CLASS_SAMPLES;
use crate::errors::CleanerError;
use crate::index::VectorIndex;
use crate::types::{FeatureVector, Label};
use crate::vectors::{euclidean_distance, mean_vector};

/// Aggregate statistics for one category label, derived from the index.
#[derive(Clone, Debug)]
pub struct ClassStatistics {
    /// Number of stored vectors carrying the label.
    pub count: usize,
    /// Component-wise mean of the class's vectors (empty when count is 0).
    pub mean: FeatureVector,
    /// Mean distance of the class's vectors to their mean (0.0 when the
    /// class has fewer than two members).
    pub mean_intra_distance: f32,
}

impl ClassStatistics {
    /// Compute statistics from a class's stored vectors.
    pub fn from_samples(vectors: &[FeatureVector]) -> Self {
        let count = vectors.len();
        let mean = mean_vector(vectors).unwrap_or_default();
        let mean_intra_distance = if count >= MIN_CLASS_SAMPLES {
            vectors
                .iter()
                .map(|vector| euclidean_distance(vector, &mean))
                .sum::<f32>()
                / count as f32
        } else {
            0.0
        };
        Self {
            count,
            mean,
            mean_intra_distance,
        }
    }

    /// Returns `true` when the class is too small or too degenerate for a
    /// meaningful normalized mean distance.
    pub fn is_degenerate(&self) -> bool {
        self.count < MIN_CLASS_SAMPLES || !(self.mean_intra_distance > 0.0)
    }
}

/// Run-lifetime cache of per-label class statistics.
///
/// Entries are computed on first access and are read-only afterwards;
/// concurrent readers only ever observe fully-constructed values because
/// completed statistics are inserted under the write lock. Label
/// cardinality is small relative to run size, so there is no eviction.
pub struct ClassStatsCache {
    index: Arc<dyn VectorIndex>,
    entries: RwLock<HashMap<Label, Arc<ClassStatistics>>>,
}

impl ClassStatsCache {
    /// Create an empty cache backed by `index`.
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the statistics for `label`, computing and caching them on
    /// first access.
    pub fn get(&self, label: &str) -> Result<Arc<ClassStatistics>, CleanerError> {
        if let Some(stats) = self
            .entries
            .read()
            .expect("class stats cache poisoned")
            .get(label)
        {
            return Ok(Arc::clone(stats));
        }
        let computed = Arc::new(self.compute(label)?);
        let mut entries = self.entries.write().expect("class stats cache poisoned");
        // First writer wins so entries stay immutable for the run.
        let entry = entries
            .entry(label.to_string())
            .or_insert_with(|| Arc::clone(&computed));
        Ok(Arc::clone(entry))
    }

    /// Eagerly populate the cache for a set of labels before a batch.
    ///
    /// Per-label failures are logged and leave that label absent; a later
    /// [`get`](Self::get) retries the computation.
    pub fn preload<I, L>(&self, labels: I)
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        for label in labels {
            let label = label.as_ref();
            if self.contains(label) {
                continue;
            }
            match self.compute(label) {
                Ok(stats) => {
                    debug!(label = %label, count = stats.count, "class statistics preloaded");
                    self.entries
                        .write()
                        .expect("class stats cache poisoned")
                        .entry(label.to_string())
                        .or_insert_with(|| Arc::new(stats));
                }
                Err(err) => {
                    warn!(label = %label, error = %err, "class statistics preload failed");
                }
            }
        }
    }

    /// Drop every cached entry. Used between independent runs.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("class stats cache poisoned")
            .clear();
    }

    /// Returns `true` when statistics for `label` are already cached.
    pub fn contains(&self, label: &str) -> bool {
        self.entries
            .read()
            .expect("class stats cache poisoned")
            .contains_key(label)
    }

    /// Number of cached labels.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("class stats cache poisoned")
            .len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn compute(&self, label: &str) -> Result<ClassStatistics, CleanerError> {
        let samples = self.index.get_by_label(label, true).map_err(|err| {
            CleanerError::ClassStatistics {
                label: label.to_string(),
                reason: err.to_string(),
            }
        })?;
        let vectors: Vec<FeatureVector> = samples
            .into_iter()
            .filter_map(|sample| sample.vector)
            .collect();
        Ok(ClassStatistics::from_samples(&vectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexedSample, InMemoryIndex, Neighbor, SampleMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded_index() -> Arc<InMemoryIndex> {
        let mut index = InMemoryIndex::new();
        index.insert(vec![0.0, 0.0], SampleMetadata::with_labels(["CAR"]));
        index.insert(vec![2.0, 0.0], SampleMetadata::with_labels(["CAR"]));
        index.insert(vec![5.0, 5.0], SampleMetadata::with_labels(["BUS"]));
        Arc::new(index)
    }

    #[test]
    fn statistics_from_samples_cover_small_classes() {
        let empty = ClassStatistics::from_samples(&[]);
        assert_eq!(empty.count, 0);
        assert!(empty.is_degenerate());

        let single = ClassStatistics::from_samples(&[vec![1.0, 1.0]]);
        assert_eq!(single.count, 1);
        assert!(single.mean_intra_distance.abs() < f32::EPSILON);
        assert!(single.is_degenerate());

        let pair = ClassStatistics::from_samples(&[vec![0.0, 0.0], vec![2.0, 0.0]]);
        assert_eq!(pair.count, 2);
        assert_eq!(pair.mean, vec![1.0, 0.0]);
        assert!((pair.mean_intra_distance - 1.0).abs() < 1e-6);
        assert!(!pair.is_degenerate());
    }

    #[test]
    fn get_computes_once_and_serves_from_cache() {
        struct CountingIndex {
            inner: Arc<InMemoryIndex>,
            gets: AtomicUsize,
        }

        impl VectorIndex for CountingIndex {
            fn query_nearest(
                &self,
                vector: &[f32],
                k: usize,
                label_filter: Option<&str>,
            ) -> Result<Vec<Neighbor>, CleanerError> {
                self.inner.query_nearest(vector, k, label_filter)
            }

            fn get_by_label(
                &self,
                label: &str,
                include_vectors: bool,
            ) -> Result<Vec<IndexedSample>, CleanerError> {
                self.gets.fetch_add(1, Ordering::SeqCst);
                self.inner.get_by_label(label, include_vectors)
            }
        }

        let counting = Arc::new(CountingIndex {
            inner: seeded_index(),
            gets: AtomicUsize::new(0),
        });
        let cache = ClassStatsCache::new(counting.clone());

        let first = cache.get("CAR").unwrap();
        let second = cache.get("CAR").unwrap();
        assert_eq!(counting.gets.load(Ordering::SeqCst), 1);
        assert_eq!(first.count, 2);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn preload_failures_leave_label_absent_for_retry() {
        struct FlakyIndex {
            inner: Arc<InMemoryIndex>,
            failures_left: AtomicUsize,
        }

        impl VectorIndex for FlakyIndex {
            fn query_nearest(
                &self,
                vector: &[f32],
                k: usize,
                label_filter: Option<&str>,
            ) -> Result<Vec<Neighbor>, CleanerError> {
                self.inner.query_nearest(vector, k, label_filter)
            }

            fn get_by_label(
                &self,
                label: &str,
                include_vectors: bool,
            ) -> Result<Vec<IndexedSample>, CleanerError> {
                if self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                        left.checked_sub(1)
                    })
                    .is_ok()
                {
                    return Err(CleanerError::Index("transient backend outage".into()));
                }
                self.inner.get_by_label(label, include_vectors)
            }
        }

        let flaky = Arc::new(FlakyIndex {
            inner: seeded_index(),
            failures_left: AtomicUsize::new(1),
        });
        let cache = ClassStatsCache::new(flaky);

        cache.preload(["CAR"]);
        assert!(!cache.contains("CAR"));

        // On-demand lookup retries and succeeds once the outage clears.
        let stats = cache.get("CAR").unwrap();
        assert_eq!(stats.count, 2);
        assert!(cache.contains("CAR"));
    }

    #[test]
    fn preload_clear_and_unknown_labels() {
        let cache = ClassStatsCache::new(seeded_index());
        cache.preload(["CAR", "BUS", "PLANE"]);
        assert_eq!(cache.len(), 3);

        // Unknown labels cache an empty, degenerate class rather than failing.
        let unknown = cache.get("PLANE").unwrap();
        assert_eq!(unknown.count, 0);
        assert!(unknown.is_degenerate());

        cache.clear();
        assert!(cache.is_empty());
    }
}
