/// Constants used by confidence scoring and decisioning.
pub mod scoring {
    /// Default neighbor count for the k-NN consistency metric.
    pub const DEFAULT_K_NEIGHBORS: usize = 20;
    /// Fixed reference intra-class distance used to normalize the nearest
    /// same-class distance metric.
    pub const DEFAULT_REFERENCE_INTRA_DISTANCE: f32 = 0.5;
    /// Default weight applied to k-NN consistency in the confidence score.
    pub const DEFAULT_CONSISTENCY_WEIGHT: f32 = 1.0;
    /// Default weight applied to the nearest same-class distance.
    pub const DEFAULT_NEAREST_DISTANCE_WEIGHT: f32 = 0.5;
    /// Default weight applied to the class mean distance.
    pub const DEFAULT_CLASS_DISTANCE_WEIGHT: f32 = 0.5;
    /// Default score threshold at or above which a label is accepted.
    pub const DEFAULT_ACCEPT_THRESHOLD: f32 = 0.4;
    /// Default score threshold at or below which a label is rejected.
    pub const DEFAULT_REJECT_THRESHOLD: f32 = -0.4;
    /// Sentinel for distance metrics whose inputs are missing or failed.
    pub const DISTANCE_SENTINEL: f32 = 1.0;
    /// Upper clamp for the normalized class mean distance.
    pub const CLASS_DISTANCE_CLAMP: f32 = 3.0;
    /// Score assigned when validation fails entirely for one (vector, label) pair.
    pub const FAILED_VALIDATION_SCORE: f32 = -1.0;
    /// Minimum class population below which class statistics are unusable.
    pub const MIN_CLASS_SAMPLES: usize = 2;
}

/// Constants used by the cleaning pipeline driver.
pub mod cleaner {
    /// Default number of records processed per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 200;
    /// Error text recorded when a record's image file does not exist.
    pub const MISSING_FILE_MSG: &str = "image file does not exist";
    /// Error text recorded when a record carries an empty image path.
    pub const EMPTY_PATH_MSG: &str = "record has no image path";
    /// Error text prefix recorded when a record's image file cannot be opened.
    pub const UNREADABLE_FILE_MSG: &str = "image file is not readable";
    /// Error text recorded when a record has no candidate labels.
    pub const NO_LABEL_MSG: &str = "record carries no category labels";
}

/// Constants used by the parallel extraction dispatcher.
pub mod dispatch {
    /// Default per-worker batch size below which batches are never split.
    pub const DEFAULT_PER_WORKER_BATCH_SIZE: usize = 32;
    /// Failure reason recorded when a worker thread panics mid-extraction.
    pub const WORKER_PANIC_REASON: &str = "extraction worker panicked";
    /// Failure reason recorded when no worker is registered at dispatch time.
    pub const NO_WORKER_REASON: &str = "no extraction worker registered";
}
