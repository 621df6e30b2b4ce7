//! Embedding model and extraction worker interfaces.
//!
//! The embedding model itself is an external collaborator: anything that
//! maps an image file to a fixed-length, L2-normalized feature vector can
//! implement [`EmbeddingModel`]. The dispatcher schedules work through
//! [`ExtractionWorker`], which additionally reports a resource budget so
//! batches can be split load-proportionally across accelerators.

use crate::errors::CleanerError;
use crate::types::{FeatureVector, ImagePath, WorkerId};

/// External feature extractor mapping image files to embedding vectors.
///
/// For a given file the output must be deterministic up to floating-point
/// tolerance. Implementations own image decoding and file I/O.
pub trait EmbeddingModel: Send + Sync {
    /// Stable model identifier used in logs and dispatch telemetry.
    fn id(&self) -> &str;

    /// Extract the feature vector for a single image file.
    fn extract(&self, path: &str) -> Result<FeatureVector, CleanerError>;

    /// Extract feature vectors for a batch of image files, in input order.
    ///
    /// The default implementation loops [`extract`](Self::extract); models
    /// with a native batched forward pass should override it.
    fn extract_batch(&self, paths: &[ImagePath]) -> Result<Vec<FeatureVector>, CleanerError> {
        paths.iter().map(|path| self.extract(path)).collect()
    }
}

/// One schedulable compute slot for batched extraction.
///
/// A worker typically wraps one model replica pinned to one accelerator.
/// Its reported budget (free device memory, in any consistent unit) drives
/// the dispatcher's load-proportional batch split.
pub trait ExtractionWorker: Send + Sync {
    /// Stable worker identifier, e.g. `cuda:0`.
    fn id(&self) -> &str;

    /// Currently available resource budget, in arbitrary consistent units.
    fn available_budget(&self) -> u64;

    /// Extract feature vectors for a slice of the batch, in input order.
    fn extract_batch(&self, paths: &[ImagePath]) -> Result<Vec<FeatureVector>, CleanerError>;
}

/// Adapter exposing an [`EmbeddingModel`] as a dispatch worker with a
/// fixed budget.
pub struct ModelWorker<M> {
    id: WorkerId,
    budget: u64,
    model: M,
}

impl<M: EmbeddingModel> ModelWorker<M> {
    /// Wrap `model` as a worker reporting a constant `budget`.
    pub fn new(id: impl Into<WorkerId>, budget: u64, model: M) -> Self {
        Self {
            id: id.into(),
            budget,
            model,
        }
    }
}

impl<M: EmbeddingModel> ExtractionWorker for ModelWorker<M> {
    fn id(&self) -> &str {
        &self.id
    }

    fn available_budget(&self) -> u64 {
        self.budget
    }

    fn extract_batch(&self, paths: &[ImagePath]) -> Result<Vec<FeatureVector>, CleanerError> {
        self.model.extract_batch(paths)
    }
}
