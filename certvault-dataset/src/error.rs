//! Error types for dataset addressing

use thiserror::Error;

/// Result type for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Error type for dataset operations
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Bad source, state, date id or port
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// IO error while traversing or moving dataset files
    #[error("dataset IO error: {0}")]
    Io(#[from] std::io::Error),
}
