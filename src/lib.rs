#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Cleaning pipeline driver, result sinks, and input loaders.
pub mod cleaner;
/// Cleaning run configuration types.
pub mod config;
/// Centralized constants used across scoring, dispatch, and the driver.
pub mod constants;
/// Record, result, and decision types.
pub mod data;
/// Parallel extraction dispatch across compute workers.
pub mod dispatch;
/// Embedding model and extraction worker interfaces.
pub mod embedder;
/// Vector index interface and the in-memory reference backend.
pub mod index;
/// Run summary counters and rates.
pub mod metrics;
/// Confidence scoring for single (vector, label) pairs.
pub mod scoring;
/// Per-label class statistics and their run-lifetime cache.
pub mod stats;
/// Shared type aliases.
pub mod types;
/// Batch validation, label grouping, and the decision merge.
pub mod validator;
/// Vector math helpers.
pub mod vectors;

mod errors;

pub use cleaner::{
    records_from_dir, records_from_json, DataCleaner, JsonLinesSink, ResultSink, VecSink,
};
pub use config::{CleanerConfig, DecisionThresholds, ScoreWeights};
pub use data::{
    CategoryResult, CleaningResult, Decision, ImageRecord, ValidationMetrics,
};
pub use dispatch::{
    DispatcherInfo, ExtractionDispatcher, PartialExtraction, SliceFailure, WorkerDispatchStats,
};
pub use embedder::{EmbeddingModel, ExtractionWorker, ModelWorker};
pub use errors::CleanerError;
pub use index::{IndexedSample, InMemoryIndex, Neighbor, SampleMetadata, VectorIndex};
pub use metrics::{summarize, DecisionCounts, RunSummary};
pub use scoring::{consistency_among, LabelScorer};
pub use stats::{ClassStatistics, ClassStatsCache};
pub use types::{FeatureVector, ImageId, ImagePath, Label, WorkerId};
pub use validator::{merge_decisions, BatchValidator};
