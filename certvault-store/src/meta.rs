//! Store metadata and commit history
//!
//! When `maintain_info` is enabled the store keeps a small side file with
//! ownership info and one history entry per commit.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the metadata file inside the storage directory.
pub const META_FILENAME: &str = ".CertFileDB-META.toml";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `[INFO]` table of the metadata file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreInfo {
    pub owner: String,
    pub description: String,
    pub created: String,
    pub number_of_certificates: u64,
    pub last_commit: String,
}

/// One `[HISTORY]` entry, keyed by a string-encoded sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: String,
    pub inserted: u64,
    pub deleted: u64,
}

/// Metadata file content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreMeta {
    #[serde(rename = "INFO")]
    pub info: StoreInfo,
    #[serde(rename = "HISTORY", default)]
    pub history: BTreeMap<String, HistoryEntry>,
}

impl StoreMeta {
    /// Fresh metadata for a newly set up store.
    pub fn new(owner: &str, description: &str) -> Self {
        StoreMeta {
            info: StoreInfo {
                owner: owner.to_string(),
                description: description.to_string(),
                created: now(),
                number_of_certificates: 0,
                last_commit: String::new(),
            },
            history: BTreeMap::new(),
        }
    }

    /// Path of the metadata file for a storage directory.
    pub fn path_for(storage: &Path) -> PathBuf {
        storage.join(META_FILENAME)
    }

    pub fn load(storage: &Path) -> Result<Self> {
        let path = Self::path_for(storage);
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| StoreError::Config(format!("invalid metadata file {}: {e}", path.display())))
    }

    pub fn save(&self, storage: &Path) -> Result<()> {
        let content = toml::to_string(self)
            .map_err(|e| StoreError::Config(format!("cannot serialize metadata: {e}")))?;
        std::fs::write(Self::path_for(storage), content)?;
        Ok(())
    }

    /// Record a finished commit. History keys are natural numbers starting
    /// at "1", monotonically increasing.
    pub fn record_commit(&mut self, inserted: u64, deleted: u64) {
        let stamp = now();
        self.info.number_of_certificates = self
            .info
            .number_of_certificates
            .saturating_add(inserted)
            .saturating_sub(deleted);
        self.info.last_commit = stamp.clone();
        let next = self
            .history
            .keys()
            .filter_map(|k| k.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        self.history.insert(
            next.to_string(),
            HistoryEntry { date: stamp, inserted, deleted },
        );
    }
}

fn now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
