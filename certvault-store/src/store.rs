//! Transactional certificate store writer
//!
//! 💾 A single writer per storage directory. Inserts land as plain
//! temporary files inside their block directory and deletes are marked
//! in-memory; `commit` folds both into the block archives, `rollback`
//! discards them. Commit can fan blocks out over a thread pool since
//! every task touches exactly one block archive.

use crate::block::BlockMap;
use crate::config::{CompressionKind, Parameters, StoreConfig};
use crate::error::{Result, StoreError};
use crate::meta::StoreMeta;
use crate::readonly::{open_archive, CertFileStoreReadOnly};
use crate::{CertReader, CertWriter};
use certvault_core::{pem_filename, remove_empty_dirs};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::ZipWriter;

/// Parameters for setting up a new store.
#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub structure_level: usize,
    pub cert_format: crate::config::CertFormat,
    pub compression_method: CompressionKind,
    pub description: String,
    pub owner: String,
    pub maintain_info: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        SetupOptions {
            structure_level: 2,
            cert_format: crate::config::CertFormat::Pem,
            compression_method: CompressionKind::Deflated,
            description: "Certvault certificate store".to_string(),
            owner: String::new(),
            maintain_info: false,
        }
    }
}

/// The implicit, always-open transaction of a writer. Both maps are keyed
/// by block id; `to_insert` entries are backed by temporary files inside
/// the block directory.
#[derive(Debug, Default)]
struct Transaction {
    to_insert: HashMap<String, HashSet<String>>,
    to_delete: HashMap<String, HashSet<String>>,
}

impl Transaction {
    fn contains(map: &HashMap<String, HashSet<String>>, block_id: &str, cert_id: &str) -> bool {
        map.get(block_id).is_some_and(|certs| certs.contains(cert_id))
    }

    fn add(map: &mut HashMap<String, HashSet<String>>, block_id: &str, cert_id: &str) {
        map.entry(block_id.to_string()).or_default().insert(cert_id.to_string());
    }
}

/// 💾 Single-writer transactional certificate store.
pub struct CertFileStore {
    ro: CertFileStoreReadOnly,
    tx: Mutex<Transaction>,
    pool: Option<rayon::ThreadPool>,
}

impl CertFileStore {
    /// Create the storage directory, configuration and metadata files.
    pub fn setup(storage: &Path, options: SetupOptions) -> Result<()> {
        let storage = std::path::absolute(storage)?;
        if StoreConfig::path_for(&storage).exists() {
            return Err(StoreError::AlreadyExists(storage));
        }
        std::fs::create_dir_all(&storage)?;
        let config = StoreConfig {
            parameters: Parameters {
                storage: storage.clone(),
                structure_level: options.structure_level,
                cert_format: options.cert_format,
                compression_method: options.compression_method,
                maintain_info: options.maintain_info,
            },
        };
        config.save(&storage)?;
        if options.maintain_info {
            StoreMeta::new(&options.owner, &options.description).save(&storage)?;
        }
        tracing::info!("✅ Store set up at {}", storage.display());
        Ok(())
    }

    /// Open an existing store for writing, committing sequentially.
    pub fn open(storage: &Path) -> Result<Self> {
        Self::open_with_cores(storage, 1)
    }

    /// Open an existing store for writing. With `cores > 1`, commit runs
    /// its per-block work on a pool of that many workers.
    pub fn open_with_cores(storage: &Path, cores: usize) -> Result<Self> {
        let ro = CertFileStoreReadOnly::open(storage)?;
        let pool = if cores > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cores)
                .build()
                .map_err(|e| StoreError::Config(format!("cannot build commit pool: {e}")))?;
            tracing::info!("Commit pool with {cores} workers");
            Some(pool)
        } else {
            None
        };
        Ok(CertFileStore { ro, tx: Mutex::new(Transaction::default()), pool })
    }

    pub fn config(&self) -> &StoreConfig {
        self.ro.config()
    }

    pub fn storage(&self) -> &Path {
        self.blocks().storage()
    }

    fn blocks(&self) -> &BlockMap {
        self.ro.blocks()
    }

    /// Run one commit stage over independent per-block tasks, in parallel
    /// when a pool is configured.
    fn run_blocks<F>(&self, tasks: Vec<(String, HashSet<String>)>, op: F) -> Vec<(String, Result<u64>)>
    where
        F: Fn(&str, &HashSet<String>) -> Result<u64> + Send + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| {
                tasks
                    .par_iter()
                    .map(|(block_id, certs)| (block_id.clone(), op(block_id, certs)))
                    .collect()
            }),
            None => tasks
                .iter()
                .map(|(block_id, certs)| (block_id.clone(), op(block_id, certs)))
                .collect(),
        }
    }
}

impl CertReader for CertFileStore {
    fn get(&self, cert_id: &str) -> Result<String> {
        let block_id = self.blocks().block_id(cert_id);
        {
            let tx = self.tx.lock();
            if Transaction::contains(&tx.to_insert, block_id, cert_id) {
                let temp = self.blocks().temp_file(cert_id);
                tracing::debug!("<{cert_id}> found in open transaction");
                return Ok(std::fs::read_to_string(temp)?);
            }
            if Transaction::contains(&tx.to_delete, block_id, cert_id) {
                return Err(StoreError::NotAvailable(cert_id.to_string()));
            }
        }
        self.ro.get(cert_id)
    }

    fn export(&self, cert_id: &str, target_dir: &Path, copy_if_exists: bool) -> Result<PathBuf> {
        let block_id = self.blocks().block_id(cert_id);
        {
            let tx = self.tx.lock();
            if Transaction::contains(&tx.to_insert, block_id, cert_id) {
                let temp = self.blocks().temp_file(cert_id);
                tracing::debug!("<{cert_id}> exported from open transaction");
                if !copy_if_exists {
                    return Ok(temp);
                }
                let target = target_dir.join(pem_filename(cert_id));
                std::fs::copy(&temp, &target)?;
                return Ok(target);
            }
            if Transaction::contains(&tx.to_delete, block_id, cert_id) {
                return Err(StoreError::NotAvailable(cert_id.to_string()));
            }
        }
        self.ro.export(cert_id, target_dir, copy_if_exists)
    }

    fn exists(&self, cert_id: &str) -> bool {
        let block_id = self.blocks().block_id(cert_id);
        {
            let tx = self.tx.lock();
            if Transaction::contains(&tx.to_insert, block_id, cert_id) {
                return true;
            }
            if Transaction::contains(&tx.to_delete, block_id, cert_id) {
                return false;
            }
        }
        self.ro.exists(cert_id)
    }
}

impl CertWriter for CertFileStore {
    fn insert(&self, cert_id: &str, cert: &str) -> Result<()> {
        if cert_id.is_empty() || cert.is_empty() {
            return Err(StoreError::InvalidCert(format!(
                "cert_id <{cert_id}> or content ({} bytes) invalid",
                cert.len()
            )));
        }
        let block_id = self.blocks().block_id(cert_id).to_string();
        let mut tx = self.tx.lock();
        if Transaction::contains(&tx.to_insert, &block_id, cert_id) {
            tracing::debug!("<{cert_id}> already staged, keeping first write");
            return Ok(());
        }
        let block_dir = self.blocks().block_dir(cert_id);
        std::fs::create_dir_all(&block_dir)?;
        let temp = self.blocks().temp_file(cert_id);
        if temp.exists() {
            tracing::info!("⚠️ <{cert_id}> already staged on disk, keeping first write");
        } else {
            std::fs::write(&temp, cert)?;
        }
        Transaction::add(&mut tx.to_insert, &block_id, cert_id);
        tracing::debug!("💾 <{cert_id}> staged into block {block_id}");
        Ok(())
    }

    fn delete(&self, cert_id: &str) -> Result<()> {
        if cert_id.is_empty() {
            return Err(StoreError::InvalidCert("empty cert_id".to_string()));
        }
        let block_id = self.blocks().block_id(cert_id).to_string();
        let mut tx = self.tx.lock();
        if Transaction::contains(&tx.to_insert, &block_id, cert_id) {
            if let Some(certs) = tx.to_insert.get_mut(&block_id) {
                certs.remove(cert_id);
            }
            std::fs::remove_file(self.blocks().temp_file(cert_id))?;
            tracing::debug!("🗑️ <{cert_id}> dropped from open transaction");
        } else {
            Transaction::add(&mut tx.to_delete, &block_id, cert_id);
            tracing::debug!("🗑️ <{cert_id}> will be deleted upon commit");
        }
        self.ro.cache_remove(cert_id);
        Ok(())
    }

    fn commit(&self) -> Result<(u64, u64)> {
        let mut tx = self.tx.lock();
        tracing::info!("💾 Commit started");

        // Delete stage first: a rewrite of a block must never race an
        // append into the same block.
        let delete_tasks: Vec<_> =
            tx.to_delete.iter().map(|(b, c)| (b.clone(), c.clone())).collect();
        let mut deleted = 0;
        let mut first_err = None;
        for (block_id, result) in self.run_blocks(delete_tasks, |block_id, certs| {
            delete_certs(&self.blocks().archive_path(block_id), certs)
        }) {
            match result {
                Ok(count) => {
                    deleted += count;
                    tx.to_delete.remove(&block_id);
                }
                Err(err) => {
                    tracing::warn!("⚠️ Deletion failed for block {block_id}: {err}");
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err.take() {
            return Err(err);
        }
        tracing::info!("🗑️ Deleted {deleted} certificates");

        let compression = self.config().parameters.compression_method;
        let insert_tasks: Vec<_> =
            tx.to_insert.iter().map(|(b, c)| (b.clone(), c.clone())).collect();
        let mut inserted = 0;
        for (block_id, result) in self.run_blocks(insert_tasks, |block_id, certs| {
            persist_certs(
                &self.blocks().block_dir(block_id),
                &self.blocks().archive_path(block_id),
                certs,
                compression,
            )
        }) {
            match result {
                Ok(count) => {
                    inserted += count;
                    tx.to_insert.remove(&block_id);
                }
                Err(err) => {
                    tracing::warn!("⚠️ Insertion failed for block {block_id}: {err}");
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err.take() {
            // Persisted blocks are gone from the transaction, the rest can
            // be committed again.
            return Err(err);
        }
        tracing::info!("💾 Inserted {inserted} certificates");

        if self.config().parameters.maintain_info {
            let mut meta = StoreMeta::load(self.storage()).unwrap_or_default();
            meta.record_commit(inserted, deleted);
            meta.save(self.storage())?;
        }
        remove_empty_dirs(self.storage())?;
        tracing::info!("✅ Commit finished");
        Ok((inserted, deleted))
    }

    fn rollback(&self) -> Result<()> {
        let mut tx = self.tx.lock();
        tracing::info!("🗑️ Rollback started");
        for certs in tx.to_insert.values() {
            for cert_id in certs {
                std::fs::remove_file(self.blocks().temp_file(cert_id))?;
            }
        }
        tx.to_insert.clear();
        tx.to_delete.clear();
        remove_empty_dirs(self.storage())?;
        tracing::info!("✅ Rollback finished");
        Ok(())
    }
}

/// Rewrite a block archive without the deleted members. The survivors are
/// copied into a sibling `_new` file which is renamed over the original, so
/// a crash leaves either the old or the new archive, never a torn one.
fn delete_certs(archive_path: &Path, certs: &HashSet<String>) -> Result<u64> {
    if certs.is_empty() {
        return Ok(0);
    }
    let mut source = match open_archive(archive_path)? {
        Some(archive) => archive,
        None => return Ok(0),
    };
    let new_path = {
        let mut name = archive_path.as_os_str().to_os_string();
        name.push("_new");
        PathBuf::from(name)
    };
    let mut target = ZipWriter::new(File::create(&new_path)?);
    let mut deleted = 0;
    let mut kept = 0;
    for index in 0..source.len() {
        let member = source.by_index_raw(index)?;
        // Match by stem so stores written with `.pem` member names stay
        // compatible.
        let stem = Path::new(member.name())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| member.name().to_string());
        if certs.contains(&stem) {
            deleted += 1;
        } else {
            target.raw_copy_file(member)?;
            kept += 1;
        }
    }
    target.finish()?;
    if kept == 0 {
        // Every member went away, do not leave an empty archive behind
        std::fs::remove_file(archive_path)?;
        std::fs::remove_file(&new_path)?;
    } else {
        std::fs::rename(&new_path, archive_path)?;
    }
    tracing::debug!("🗑️ Deleted {deleted} members from {}", archive_path.display());
    Ok(deleted)
}

/// Move staged temporary files of one block into its archive. Members
/// already persisted under the same name are skipped, their temp files are
/// still consumed.
fn persist_certs(
    block_dir: &Path,
    archive_path: &Path,
    certs: &HashSet<String>,
    compression: CompressionKind,
) -> Result<u64> {
    if certs.is_empty() {
        return Ok(0);
    }
    let persisted: HashSet<String> = match open_archive(archive_path)? {
        Some(archive) => archive.file_names().map(str::to_string).collect(),
        None => HashSet::new(),
    };
    let mut writer = if archive_path.exists() {
        tracing::debug!("Appending to archive {}", archive_path.display());
        let file = File::options().read(true).write(true).open(archive_path)?;
        ZipWriter::new_append(file)?
    } else {
        tracing::debug!("Creating archive {}", archive_path.display());
        ZipWriter::new(File::create(archive_path)?)
    };
    let options = FileOptions::default().compression_method(compression.method());

    // Stable member order keeps commits reproducible regardless of pool size
    let mut ids: Vec<&String> = certs.iter().collect();
    ids.sort();
    let mut inserted = 0;
    for cert_id in ids {
        let temp = block_dir.join(cert_id);
        if !persisted.contains(cert_id.as_str()) {
            writer.start_file(cert_id.as_str(), options)?;
            let mut source = File::open(&temp)?;
            std::io::copy(&mut source, &mut writer)?;
            inserted += 1;
        }
        std::fs::remove_file(&temp)?;
    }
    writer.finish()?;
    tracing::debug!("💾 Persisted {inserted} members into {}", archive_path.display());
    Ok(inserted)
}
