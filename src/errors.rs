use std::io;

use thiserror::Error;

use crate::types::{Label, WorkerId};

/// Error type for configuration, index, extraction, and persistence failures.
#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("vector index query failed: {0}")]
    Index(String),
    #[error("extraction failed on worker '{worker_id}': {reason}")]
    Extraction { worker_id: WorkerId, reason: String },
    #[error("class statistics unavailable for label '{label}': {reason}")]
    ClassStatistics { label: Label, reason: String },
    #[error("result sink failure: {0}")]
    Sink(String),
    #[error("input data error: {0}")]
    Input(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}
