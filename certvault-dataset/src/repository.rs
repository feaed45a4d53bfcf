//! Dataset repository traversal

use crate::dataset::{Dataset, DatasetSource, DatasetState};
use crate::error::{DatasetError, Result};
use std::path::{Path, PathBuf};

/// One dataset file found in the repository.
#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub dataset: Dataset,
    pub state: DatasetState,
    pub path: PathBuf,
}

/// A dataset repository rooted at a single directory, laid out as
/// `<root>/<SOURCE>/<STATE>/<dataset files>`.
#[derive(Debug, Clone)]
pub struct DatasetRepository {
    root: PathBuf,
}

impl DatasetRepository {
    pub fn new(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(DatasetError::InvalidDataset(format!(
                "repository {} does not exist",
                root.display()
            )));
        }
        Ok(DatasetRepository { root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List dataset files matching the filters. `date_prefix` matches the
    /// leading characters of the date id (a whole year, a month, one day).
    pub fn list(
        &self,
        source: Option<DatasetSource>,
        state: Option<DatasetState>,
        date_prefix: &str,
    ) -> Result<Vec<DatasetEntry>> {
        let sources = source.map_or_else(|| DatasetSource::ALL.to_vec(), |s| vec![s]);
        let states = state.map_or_else(|| DatasetState::ALL.to_vec(), |s| vec![s]);
        let mut entries = Vec::new();
        for source in &sources {
            for state in &states {
                let dir = self.root.join(source.to_string()).join(state.to_string());
                let listing = match std::fs::read_dir(&dir) {
                    Ok(listing) => listing,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                let mut found: Vec<PathBuf> = Vec::new();
                for entry in listing {
                    found.push(entry?.path());
                }
                found.sort();
                for path in found {
                    let Ok((dataset, parsed_state)) = Dataset::from_full_path(&path) else {
                        tracing::debug!("Skipping non-dataset file {}", path.display());
                        continue;
                    };
                    if !dataset.date_id().starts_with(date_prefix) {
                        continue;
                    }
                    entries.push(DatasetEntry { dataset, state: parsed_state, path });
                }
            }
        }
        Ok(entries)
    }

    /// Human-readable listing used by the CLI.
    pub fn dumps(
        &self,
        source: Option<DatasetSource>,
        state: Option<DatasetState>,
        date_prefix: &str,
    ) -> Result<String> {
        let entries = self.list(source, state, date_prefix)?;
        let mut out = String::new();
        for entry in entries {
            out.push_str(&format!(
                "{:<8} {:<10} {}\n",
                entry.dataset.source().to_string(),
                entry.state.to_string(),
                entry.path.display()
            ));
        }
        Ok(out)
    }

    /// Remove every dataset file of a state (or of all states) for a
    /// source, pruning the emptied directories.
    pub fn purge(&self, source: DatasetSource, state: Option<DatasetState>) -> Result<()> {
        let states = state.map_or_else(|| DatasetState::ALL.to_vec(), |s| vec![s]);
        for state in states {
            let dir = self.root.join(source.to_string()).join(state.to_string());
            if dir.is_dir() {
                tracing::info!("Purging {}", dir.display());
                std::fs::remove_dir_all(&dir)?;
            }
        }
        let source_dir = self.root.join(source.to_string());
        if source_dir.is_dir() && std::fs::read_dir(&source_dir)?.next().is_none() {
            std::fs::remove_dir(&source_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(root: &Path) {
        for (source, state, name) in [
            ("RAPID", "COLLECTED", "20200601_443_certs.gz"),
            ("RAPID", "COLLECTED", "20200601_443_hosts.gz"),
            ("RAPID", "UNIFIED", "20200601_443_chains.gz"),
            ("RAPID", "UNIFIED", "20190301_443_chains.gz"),
            ("CENSYS", "COLLECTED", "20200601.gz"),
        ] {
            let dir = root.join(source).join(state);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(name), "x").unwrap();
        }
    }

    #[test]
    fn list_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let repo = DatasetRepository::new(dir.path()).unwrap();

        assert_eq!(repo.list(None, None, "").unwrap().len(), 5);
        assert_eq!(repo.list(Some(DatasetSource::Rapid), None, "").unwrap().len(), 4);
        assert_eq!(
            repo.list(Some(DatasetSource::Rapid), Some(DatasetState::Unified), "2020").unwrap().len(),
            1
        );
        assert_eq!(repo.list(None, None, "2019").unwrap().len(), 1);
    }

    #[test]
    fn dumps_renders_one_line_per_file() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let repo = DatasetRepository::new(dir.path()).unwrap();
        let text = repo.dumps(Some(DatasetSource::Censys), None, "").unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("CENSYS"));
        assert!(text.contains("20200601.gz"));
    }

    #[test]
    fn purge_state_and_source() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let repo = DatasetRepository::new(dir.path()).unwrap();

        repo.purge(DatasetSource::Rapid, Some(DatasetState::Collected)).unwrap();
        assert!(!dir.path().join("RAPID/COLLECTED").exists());
        assert!(dir.path().join("RAPID/UNIFIED").exists());

        repo.purge(DatasetSource::Rapid, None).unwrap();
        assert!(!dir.path().join("RAPID").exists());
    }

    #[test]
    fn missing_root_is_invalid() {
        assert!(DatasetRepository::new(Path::new("/nonexistent/certvault-repo")).is_err());
    }
}
