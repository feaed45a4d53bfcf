//! Error types for the ingest pipeline

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Collecting raw datasets failed
    #[error("collection failed: {0}")]
    CollectionFailed(String),

    /// Unifying raw datasets failed
    #[error("unification failed: {0}")]
    UnificationFailed(String),

    /// Analysing unified datasets failed
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    /// Unknown pipeline task name
    #[error("unknown pipeline task <{0}>")]
    UnknownTask(String),

    /// Dataset addressing error
    #[error(transparent)]
    Dataset(#[from] certvault_dataset::DatasetError),

    /// Certificate store error
    #[error(transparent)]
    Store(#[from] certvault_store::StoreError),

    /// IO error in a pipeline stage
    #[error("pipeline IO error: {0}")]
    Io(#[from] std::io::Error),
}
