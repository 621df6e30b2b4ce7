//! Vector index interface and the in-memory reference backend.
//!
//! Ownership model:
//! - `VectorIndex` is the engine-facing interface over the persistent
//!   embedding store; implementations adapt a concrete backend.
//! - `InMemoryIndex` is a linear-scan backend for tests and small datasets.
//!
//! Concrete backends commonly expose category membership as per-label
//! boolean filter fields (for example an `is_<label>` naming scheme); that
//! convention belongs in the adapter. Core code only sees the explicit
//! label map carried by [`SampleMetadata`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::ImageRecord;
use crate::errors::CleanerError;
use crate::types::{FeatureVector, ImagePath, Label};
use crate::vectors::euclidean_distance;

/// Metadata stored alongside an indexed vector.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Source path of the indexed image, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ImagePath>,
    /// Category membership map; absent labels mean "not a member".
    pub labels: BTreeMap<Label, bool>,
}

impl SampleMetadata {
    /// Build metadata marking membership in each of the given labels.
    pub fn with_labels<I, L>(labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        Self {
            path: None,
            labels: labels.into_iter().map(|label| (label.into(), true)).collect(),
        }
    }

    /// Metadata for an ingested record: its path plus its label set.
    pub fn from_record(record: &ImageRecord) -> Self {
        let mut metadata = Self::with_labels(record.labels.iter().cloned());
        metadata.path = Some(record.path.clone());
        metadata
    }

    /// Returns `true` when the sample is marked as a member of `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.get(label).copied().unwrap_or(false)
    }
}

/// One nearest-neighbor hit returned by a similarity query.
#[derive(Clone, Debug)]
pub struct Neighbor {
    /// Distance from the query vector to this sample.
    pub distance: f32,
    /// Stored metadata of the matched sample.
    pub metadata: SampleMetadata,
}

/// One stored sample returned by a filtered get.
#[derive(Clone, Debug)]
pub struct IndexedSample {
    /// The stored vector, present only when requested.
    pub vector: Option<FeatureVector>,
    /// Stored metadata of the sample.
    pub metadata: SampleMetadata,
}

/// Engine-facing interface over the reference embedding index.
///
/// Implementations must be safe for concurrent reads; the engine performs
/// no locking around them.
pub trait VectorIndex: Send + Sync {
    /// Return the `k` nearest stored samples to `vector`, closest first.
    ///
    /// With `label_filter` set, only samples marked as members of that
    /// label are considered.
    fn query_nearest(
        &self,
        vector: &[f32],
        k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<Neighbor>, CleanerError>;

    /// Batched form of [`query_nearest`](Self::query_nearest): one result
    /// row per query vector, in query order.
    ///
    /// The default implementation loops the single-vector query; backends
    /// with a native batched call should override it.
    fn query_nearest_batch(
        &self,
        vectors: &[&[f32]],
        k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<Vec<Neighbor>>, CleanerError> {
        vectors
            .iter()
            .map(|vector| self.query_nearest(vector, k, label_filter))
            .collect()
    }

    /// Return every stored sample marked as a member of `label`.
    ///
    /// Vectors are included only when `include_vectors` is set; metadata is
    /// always returned.
    fn get_by_label(
        &self,
        label: &str,
        include_vectors: bool,
    ) -> Result<Vec<IndexedSample>, CleanerError>;
}

/// Linear-scan index for tests and small datasets.
#[derive(Default)]
pub struct InMemoryIndex {
    samples: Vec<(FeatureVector, SampleMetadata)>,
}

impl InMemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one vector with its metadata.
    pub fn insert(&mut self, vector: FeatureVector, metadata: SampleMetadata) {
        self.samples.push((vector, metadata));
    }

    /// Store one vector under a record's path and label set.
    pub fn insert_record(&mut self, record: &ImageRecord, vector: FeatureVector) {
        self.insert(vector, SampleMetadata::from_record(record));
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl VectorIndex for InMemoryIndex {
    fn query_nearest(
        &self,
        vector: &[f32],
        k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<Neighbor>, CleanerError> {
        let mut hits: Vec<Neighbor> = self
            .samples
            .iter()
            .filter(|(_, metadata)| {
                label_filter
                    .map(|label| metadata.has_label(label))
                    .unwrap_or(true)
            })
            .map(|(stored, metadata)| Neighbor {
                distance: euclidean_distance(vector, stored),
                metadata: metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn get_by_label(
        &self,
        label: &str,
        include_vectors: bool,
    ) -> Result<Vec<IndexedSample>, CleanerError> {
        Ok(self
            .samples
            .iter()
            .filter(|(_, metadata)| metadata.has_label(label))
            .map(|(vector, metadata)| IndexedSample {
                vector: include_vectors.then(|| vector.clone()),
                metadata: metadata.clone(),
            })
            .collect())
    }
}
