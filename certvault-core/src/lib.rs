//! Certvault Core Module
//!
//! Small leaf utilities shared by the other Certvault crates:
//! - PEM/BASE64 text helpers
//! - Filesystem helpers (empty-directory pruning)

pub mod fs;
pub mod pem;

pub use fs::remove_empty_dirs;
pub use pem::{base64_to_pem, looks_like_pem, pem_filename};
