//! Certvault Dataset Module
//!
//! Dataset addressing:
//! - Canonical filename grammar `<date>[_<port>][_<suffix>].<ext>`
//! - Per-source, per-state repository layout
//! - Repository traversal and state moves

pub mod dataset;
pub mod error;
pub mod repository;

pub use dataset::{Dataset, DatasetSource, DatasetState};
pub use error::{DatasetError, Result};
pub use repository::{DatasetEntry, DatasetRepository};
