//! Error types for the certificate store

use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested certificate is not available in any resolution stage
    #[error("🔍 Not Available: certificate <{0}>")]
    NotAvailable(String),

    /// Certificate has an invalid id or content
    #[error("⚠️ Invalid Certificate: {0}")]
    InvalidCert(String),

    /// Store already exists at the given location
    #[error("⚠️ Already Exists: store at {0}")]
    AlreadyExists(PathBuf),

    /// No store configuration found at the given location
    #[error("🔍 Not Found: no store at {0}")]
    NotFound(PathBuf),

    /// Configuration or metadata file could not be read or written
    #[error("⚠️ Invalid Configuration: {0}")]
    Config(String),

    /// Block archive error
    #[error("💥 Archive Error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// IO error from archive or temporary file access
    #[error("💥 IO Error: {0}")]
    Storage(#[from] std::io::Error),
}
