//! Certvault Store Module
//!
//! Content-addressed certificate storage including:
//! - Transactional single-writer store backed by ZIP block archives
//! - Read-only store handles with an in-process existence cache
//! - Composite store fanning out to a group of child stores
//! - TOML configuration and metadata/history files

pub mod block;
pub mod composite;
pub mod config;
pub mod error;
pub mod meta;
pub mod readonly;
pub mod store;

pub use block::BlockMap;
pub use composite::CompositeStore;
pub use config::{CertFormat, CompressionKind, StoreConfig, CONFIG_FILENAME};
pub use error::{Result, StoreError};
pub use meta::{StoreMeta, META_FILENAME};
pub use readonly::CertFileStoreReadOnly;
pub use store::{CertFileStore, SetupOptions};

use std::path::{Path, PathBuf};

/// Read capability of a certificate store.
///
/// A certificate is identified by an opaque non-empty id (in practice a hex
/// fingerprint) and its content is an opaque non-empty text blob which the
/// store never parses.
pub trait CertReader: Send + Sync {
    /// Fetch a certificate by id.
    fn get(&self, cert_id: &str) -> Result<String>;

    /// Export a certificate into `target_dir` as `<id>.pem` and return the
    /// path. When the certificate is only a pending insert and
    /// `copy_if_exists` is false, the path of the temporary file is returned
    /// without copying; such a path must be consumed before the next commit
    /// or rollback.
    fn export(&self, cert_id: &str, target_dir: &Path, copy_if_exists: bool) -> Result<PathBuf>;

    /// Whether the certificate is present (pending insert or persisted).
    fn exists(&self, cert_id: &str) -> bool;

    /// Whether every id of `cert_ids` is present.
    fn exists_all(&self, cert_ids: &[String]) -> bool {
        cert_ids.iter().all(|id| self.exists(id))
    }
}

/// Write capability of a certificate store.
pub trait CertWriter: CertReader {
    /// Stage a certificate for insertion. Duplicate inserts of the same id
    /// within one transaction coalesce; the first writer wins.
    fn insert(&self, cert_id: &str, cert: &str) -> Result<()>;

    /// Stage a certificate for deletion, or drop it immediately when it is
    /// still an uncommitted insert.
    fn delete(&self, cert_id: &str) -> Result<()>;

    /// Persist the open transaction. Returns `(inserted, deleted)` counts of
    /// archive members actually added and removed.
    fn commit(&self) -> Result<(u64, u64)>;

    /// Discard the open transaction, removing uncommitted files.
    fn rollback(&self) -> Result<()>;
}
