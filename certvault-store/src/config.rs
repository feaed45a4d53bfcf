//! Store configuration file
//!
//! Every store directory carries a `CertFileDB.toml` describing its layout.
//! The parameters are written once at setup time and are immutable after.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the storage directory.
pub const CONFIG_FILENAME: &str = "CertFileDB.toml";

/// Textual encoding of the stored certificates. Informational only, the
/// store treats certificate content as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CertFormat {
    #[default]
    #[serde(rename = "PEM")]
    Pem,
    #[serde(rename = "DER")]
    Der,
}

/// Compression applied to block archive members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionKind {
    #[serde(rename = "ZIP_STORED")]
    Stored,
    #[default]
    #[serde(rename = "ZIP_DEFLATED")]
    Deflated,
}

impl CompressionKind {
    /// Matching method of the archive library. Readers accept both.
    pub fn method(self) -> zip::CompressionMethod {
        match self {
            CompressionKind::Stored => zip::CompressionMethod::Stored,
            CompressionKind::Deflated => zip::CompressionMethod::Deflated,
        }
    }
}

/// Immutable store parameters, `[PARAMETERS]` table of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    pub storage: PathBuf,
    pub structure_level: usize,
    pub cert_format: CertFormat,
    pub compression_method: CompressionKind,
    pub maintain_info: bool,
}

/// Store configuration file content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "PARAMETERS")]
    pub parameters: Parameters,
}

impl StoreConfig {
    /// Path of the configuration file for a storage directory.
    pub fn path_for(storage: &Path) -> PathBuf {
        storage.join(CONFIG_FILENAME)
    }

    /// Load the configuration of the store at `storage`.
    ///
    /// A missing configuration file means there is no store at the location.
    pub fn load(storage: &Path) -> Result<Self> {
        let path = Self::path_for(storage);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(storage.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        let config: StoreConfig = toml::from_str(&content)
            .map_err(|e| StoreError::Config(format!("invalid config file {}: {e}", path.display())))?;
        tracing::debug!("Loaded store config from {}", path.display());
        Ok(config)
    }

    /// Write the configuration file for a new store.
    pub fn save(&self, storage: &Path) -> Result<()> {
        let path = Self::path_for(storage);
        let content = toml::to_string(self)
            .map_err(|e| StoreError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            parameters: Parameters {
                storage: dir.path().to_path_buf(),
                structure_level: 2,
                cert_format: CertFormat::Pem,
                compression_method: CompressionKind::Deflated,
                maintain_info: true,
            },
        };
        config.save(dir.path()).unwrap();

        let loaded = StoreConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.parameters.structure_level, 2);
        assert_eq!(loaded.parameters.cert_format, CertFormat::Pem);
        assert_eq!(loaded.parameters.compression_method, CompressionKind::Deflated);
        assert!(loaded.parameters.maintain_info);
    }

    #[test]
    fn load_without_config_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match StoreConfig::load(dir.path()) {
            Err(StoreError::NotFound(path)) => assert_eq!(path, dir.path()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn serialized_parameter_names_are_stable() {
        let config = StoreConfig {
            parameters: Parameters {
                storage: PathBuf::from("/var/tmp/certvault_storage"),
                structure_level: 0,
                cert_format: CertFormat::Der,
                compression_method: CompressionKind::Stored,
                maintain_info: false,
            },
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("[PARAMETERS]"));
        assert!(text.contains("cert_format = \"DER\""));
        assert!(text.contains("compression_method = \"ZIP_STORED\""));
    }
}
