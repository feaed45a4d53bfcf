//! Read-only certificate store
//!
//! 🔍 Shares the block addressing and archive-reading logic with the
//! writer but carries no transaction state. Any number of read-only
//! handles may coexist with a single writer; archives appearing,
//! disappearing or being atomically renamed underneath are tolerated.

use crate::block::BlockMap;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::CertReader;
use certvault_core::pem_filename;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

pub struct CertFileStoreReadOnly {
    blocks: BlockMap,
    config: StoreConfig,
    /// Ids known to exist in persisted archives. Advisory: a miss always
    /// falls through to the filesystem, and the whole cache is dropped when
    /// a trusted entry turns out to be stale.
    cache: RwLock<HashSet<String>>,
}

impl CertFileStoreReadOnly {
    /// Open an existing store for reading.
    pub fn open(storage: &Path) -> Result<Self> {
        let config = StoreConfig::load(storage)?;
        let blocks = BlockMap::new(storage, config.parameters.structure_level);
        tracing::info!(
            "📁 Opened read-only store at {} (structure_level={})",
            storage.display(),
            config.parameters.structure_level
        );
        Ok(CertFileStoreReadOnly { blocks, config, cache: RwLock::new(HashSet::new()) })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn blocks(&self) -> &BlockMap {
        &self.blocks
    }

    pub(crate) fn cache_insert(&self, cert_id: &str) {
        self.cache.write().insert(cert_id.to_string());
    }

    pub(crate) fn cache_remove(&self, cert_id: &str) {
        self.cache.write().remove(cert_id);
    }

    pub(crate) fn cache_contains(&self, cert_id: &str) -> bool {
        self.cache.read().contains(cert_id)
    }

    /// Drop every cached id after an authoritative lookup failed; a stale
    /// positive means the filesystem changed underneath us.
    pub(crate) fn cache_clear_on_miss(&self, cert_id: &str) {
        let mut cache = self.cache.write();
        if cache.contains(cert_id) {
            tracing::warn!("⚠️ <{cert_id}> was cached but is gone from its archive, dropping cache");
            cache.clear();
        }
    }

    /// Read a certificate out of its block archive. `Ok(None)` means the
    /// archive or the member does not exist.
    pub(crate) fn read_member(&self, cert_id: &str) -> Result<Option<String>> {
        let archive_path = self.blocks.archive_path(cert_id);
        let mut archive = match open_archive(&archive_path)? {
            Some(archive) => archive,
            None => return Ok(None),
        };
        let mut member = match archive.by_name(cert_id) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut content = String::with_capacity(member.size() as usize);
        member.read_to_string(&mut content)?;
        tracing::debug!("🔍 <{cert_id}> found persisted in {}", archive_path.display());
        Ok(Some(content))
    }

    /// Check for a certificate in its block archive without reading it.
    pub(crate) fn member_exists(&self, cert_id: &str) -> bool {
        let archive_path = self.blocks.archive_path(cert_id);
        match open_archive(&archive_path) {
            Ok(Some(archive)) => archive.file_names().any(|name| name == cert_id),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!("⚠️ Cannot read archive {}: {err}", archive_path.display());
                false
            }
        }
    }
}

impl CertReader for CertFileStoreReadOnly {
    fn get(&self, cert_id: &str) -> Result<String> {
        match self.read_member(cert_id)? {
            Some(content) => Ok(content),
            None => {
                self.cache_clear_on_miss(cert_id);
                tracing::debug!("🔍 <{cert_id}> not found");
                Err(StoreError::NotAvailable(cert_id.to_string()))
            }
        }
    }

    fn export(&self, cert_id: &str, target_dir: &Path, _copy_if_exists: bool) -> Result<PathBuf> {
        match self.read_member(cert_id)? {
            Some(content) => {
                let target = target_dir.join(pem_filename(cert_id));
                std::fs::write(&target, content)?;
                Ok(target)
            }
            None => {
                self.cache_clear_on_miss(cert_id);
                Err(StoreError::NotAvailable(cert_id.to_string()))
            }
        }
    }

    fn exists(&self, cert_id: &str) -> bool {
        if self.cache_contains(cert_id) {
            tracing::debug!("📜 <{cert_id}> found in cache");
            return true;
        }
        if self.member_exists(cert_id) {
            self.cache_insert(cert_id);
            return true;
        }
        false
    }
}

/// Open a block archive for reading, `Ok(None)` when it does not exist.
pub(crate) fn open_archive(path: &Path) -> Result<Option<ZipArchive<std::fs::File>>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(ZipArchive::new(file)?))
}
