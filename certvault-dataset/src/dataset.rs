//! Dataset identity and canonical paths
//!
//! A dataset file lives at `<repository>/<SOURCE>/<STATE>/<name>` where the
//! name follows the grammar `<date:8 digits>[_<port>][_<suffix>].<ext>`.
//! Two datasets are the same when source, date id and port match, whatever
//! their suffix or extension.

use crate::error::{DatasetError, Result};
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Scan source a dataset originates from. Doubles as the first path
/// component under the repository root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetSource {
    Rapid,
    Censys,
}

impl DatasetSource {
    pub const ALL: [DatasetSource; 2] = [DatasetSource::Rapid, DatasetSource::Censys];
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::Rapid => write!(f, "RAPID"),
            DatasetSource::Censys => write!(f, "CENSYS"),
        }
    }
}

impl FromStr for DatasetSource {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RAPID" => Ok(DatasetSource::Rapid),
            "CENSYS" => Ok(DatasetSource::Censys),
            other => Err(DatasetError::InvalidDataset(format!("unknown source <{other}>"))),
        }
    }
}

/// Lifecycle state of a dataset, in canonical pipeline order. Doubles as
/// the second path component under the repository root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetState {
    Collected,
    Filtered,
    Unified,
    Analysed,
}

impl DatasetState {
    pub const ALL: [DatasetState; 4] = [
        DatasetState::Collected,
        DatasetState::Filtered,
        DatasetState::Unified,
        DatasetState::Analysed,
    ];
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetState::Collected => write!(f, "COLLECTED"),
            DatasetState::Filtered => write!(f, "FILTERED"),
            DatasetState::Unified => write!(f, "UNIFIED"),
            DatasetState::Analysed => write!(f, "ANALYSED"),
        }
    }
}

impl FromStr for DatasetState {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "COLLECTED" => Ok(DatasetState::Collected),
            "FILTERED" => Ok(DatasetState::Filtered),
            "UNIFIED" => Ok(DatasetState::Unified),
            "ANALYSED" => Ok(DatasetState::Analysed),
            other => Err(DatasetError::InvalidDataset(format!("unknown state <{other}>"))),
        }
    }
}

/// Canonical path grammar of a dataset file inside a repository.
fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<repo>.*)[/\\](?P<source>[^/\\]+)[/\\](?P<state>[^/\\]+)[/\\](?P<date>\d{8})(_(?P<port>\d+))?(_\S+)?\.(?P<ext>\S+)$")
            .expect("dataset path regex")
    })
}

/// A single dataset, identified by `(source, date_id, port)`.
#[derive(Debug, Clone)]
pub struct Dataset {
    repository: PathBuf,
    source: DatasetSource,
    date_id: String,
    port: String,
    extension: String,
}

impl Dataset {
    /// Create a dataset handle. `date_id` must be exactly 8 digits, `port`
    /// empty or digits.
    pub fn new(
        repository: &Path,
        source: DatasetSource,
        date_id: &str,
        port: &str,
    ) -> Result<Self> {
        if date_id.len() != 8 || !date_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DatasetError::InvalidDataset(format!(
                "date id <{date_id}> must be 8 digits"
            )));
        }
        if !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DatasetError::InvalidDataset(format!("port <{port}> must be digits")));
        }
        Ok(Dataset {
            repository: repository.to_path_buf(),
            source,
            date_id: date_id.to_string(),
            port: port.to_string(),
            extension: "gz".to_string(),
        })
    }

    /// Parse a full path back into a dataset.
    pub fn from_full_path(path: &Path) -> Result<(Self, DatasetState)> {
        let text = path.to_string_lossy();
        let caps = path_regex()
            .captures(&text)
            .ok_or_else(|| DatasetError::InvalidDataset(format!("unparsable path <{text}>")))?;
        let source: DatasetSource = caps["source"].parse()?;
        let state: DatasetState = caps["state"].parse()?;
        let mut dataset = Dataset::new(
            Path::new(&caps["repo"]),
            source,
            &caps["date"],
            caps.name("port").map_or("", |m| m.as_str()),
        )?;
        dataset.extension = caps["ext"].to_string();
        Ok((dataset, state))
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    pub fn source(&self) -> DatasetSource {
        self.source
    }

    pub fn date_id(&self) -> &str {
        &self.date_id
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// `<date>[_<port>]`, the prefix every file of this dataset starts with.
    pub fn base_name(&self) -> String {
        if self.port.is_empty() {
            self.date_id.clone()
        } else {
            format!("{}_{}", self.date_id, self.port)
        }
    }

    /// `<date>[_<port>].<ext>`
    pub fn static_filename(&self) -> String {
        format!("{}.{}", self.base_name(), self.extension)
    }

    /// Directory of this dataset in the given state.
    pub fn path(&self, state: DatasetState) -> PathBuf {
        self.repository.join(self.source.to_string()).join(state.to_string())
    }

    /// Canonical file path in the given state, with an optional suffix.
    pub fn full_path(&self, state: DatasetState, suffix: &str) -> PathBuf {
        let name = if suffix.is_empty() {
            self.static_filename()
        } else {
            format!("{}_{}.{}", self.base_name(), suffix, self.extension)
        };
        self.path(state).join(name)
    }

    /// Move an arbitrary file into the canonical position for `state`.
    /// With `format_name` the destination is renamed to
    /// `<date>[_<port>]_<original name>`, otherwise the name is kept.
    pub fn move_to(&self, state: DatasetState, source: &Path, format_name: bool) -> Result<PathBuf> {
        let dir = self.path(state);
        std::fs::create_dir_all(&dir)?;
        let original = source
            .file_name()
            .ok_or_else(|| DatasetError::InvalidDataset(format!("not a file: {source:?}")))?
            .to_string_lossy();
        let name = if format_name {
            format!("{}_{}", self.base_name(), original)
        } else {
            original.into_owned()
        };
        let target = dir.join(name);
        std::fs::rename(source, &target)?;
        tracing::debug!("Moved {} to {}", source.display(), target.display());
        Ok(target)
    }

    /// List the files of this dataset in `state`, filtered by the exact
    /// prefix `<date>[_<port>][_<suffix>]`, in filesystem order.
    pub fn get(&self, state: DatasetState, suffix: &str) -> Result<Vec<PathBuf>> {
        let prefix = if suffix.is_empty() {
            self.base_name()
        } else {
            format!("{}_{}", self.base_name(), suffix)
        };
        let dir = self.path(state);
        let mut found = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                if matches_prefix(&name, &prefix) {
                    found.push(path);
                }
            }
        }
        Ok(found)
    }

    /// Whether any file of this dataset exists in `state`.
    pub fn exists(&self, state: DatasetState) -> bool {
        self.get(state, "").map(|files| !files.is_empty()).unwrap_or(false)
    }

    /// Delete every file of this dataset in `state`.
    pub fn delete(&self, state: DatasetState) -> Result<()> {
        for path in self.get(state, "")? {
            tracing::debug!("Deleting {}", path.display());
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Whether `name` starts with `prefix` at a name-part boundary. A bare
/// string prefix is not enough: port `80` must not claim the files of
/// port `8080`.
fn matches_prefix(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('_') || rest.starts_with('.'),
        None => false,
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.date_id == other.date_id && self.port == other.port
    }
}

impl Eq for Dataset {}

impl Hash for Dataset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.date_id.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.static_filename())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        Dataset::new(Path::new("/repo"), DatasetSource::Rapid, "20200601", "443").unwrap()
    }

    #[test]
    fn canonical_paths() {
        let ds = dataset();
        assert_eq!(ds.path(DatasetState::Collected), Path::new("/repo/RAPID/COLLECTED"));
        assert_eq!(
            ds.full_path(DatasetState::Unified, "chains"),
            Path::new("/repo/RAPID/UNIFIED/20200601_443_chains.gz")
        );
        assert_eq!(ds.static_filename(), "20200601_443.gz");
    }

    #[test]
    fn port_is_optional() {
        let ds = Dataset::new(Path::new("/repo"), DatasetSource::Censys, "20200601", "").unwrap();
        assert_eq!(
            ds.full_path(DatasetState::Collected, ""),
            Path::new("/repo/CENSYS/COLLECTED/20200601.gz")
        );
    }

    #[test]
    fn date_and_port_are_validated() {
        assert!(Dataset::new(Path::new("/r"), DatasetSource::Rapid, "2020", "443").is_err());
        assert!(Dataset::new(Path::new("/r"), DatasetSource::Rapid, "202006xx", "443").is_err());
        assert!(Dataset::new(Path::new("/r"), DatasetSource::Rapid, "20200601", "p443").is_err());
    }

    #[test]
    fn parse_full_path() {
        let (ds, state) = Dataset::from_full_path(Path::new(
            "/repo/RAPID/COLLECTED/20200601_443_certs.gz",
        ))
        .unwrap();
        assert_eq!(ds.source(), DatasetSource::Rapid);
        assert_eq!(state, DatasetState::Collected);
        assert_eq!(ds.date_id(), "20200601");
        assert_eq!(ds.port(), "443");

        let (ds, _) =
            Dataset::from_full_path(Path::new("/repo/RAPID/UNIFIED/20200601.gz")).unwrap();
        assert_eq!(ds.port(), "");

        assert!(Dataset::from_full_path(Path::new("/repo/RAPID/UNIFIED/junk.gz")).is_err());
    }

    #[test]
    fn equality_ignores_suffix_and_extension() {
        let a = dataset();
        let b = dataset().with_extension("csv");
        assert_eq!(a, b);

        let c = Dataset::new(Path::new("/repo"), DatasetSource::Rapid, "20200601", "8443").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn state_order_is_pipeline_order() {
        assert!(DatasetState::Collected < DatasetState::Filtered);
        assert!(DatasetState::Filtered < DatasetState::Unified);
        assert!(DatasetState::Unified < DatasetState::Analysed);
    }

    #[test]
    fn listing_and_delete_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::new(dir.path(), DatasetSource::Rapid, "20200601", "443").unwrap();
        let state_dir = ds.path(DatasetState::Collected);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("20200601_443_certs.gz"), "x").unwrap();
        std::fs::write(state_dir.join("20200601_443_hosts.gz"), "x").unwrap();
        std::fs::write(state_dir.join("20200601_8443_certs.gz"), "x").unwrap();

        assert_eq!(ds.get(DatasetState::Collected, "").unwrap().len(), 2);
        assert_eq!(ds.get(DatasetState::Collected, "certs").unwrap().len(), 1);
        assert!(ds.exists(DatasetState::Collected));

        ds.delete(DatasetState::Collected).unwrap();
        assert!(!ds.exists(DatasetState::Collected));
        assert!(state_dir.join("20200601_8443_certs.gz").exists());
    }

    #[test]
    fn port_prefix_does_not_claim_longer_ports() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::new(dir.path(), DatasetSource::Rapid, "20200601", "80").unwrap();
        let state_dir = ds.path(DatasetState::Collected);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("20200601_80_certs.gz"), "x").unwrap();
        std::fs::write(state_dir.join("20200601_8080_certs.gz"), "x").unwrap();
        std::fs::write(state_dir.join("20200601_8080_hosts.gz"), "x").unwrap();

        let found = ds.get(DatasetState::Collected, "").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("20200601_80_certs.gz"));

        // Deleting the port-80 dataset must not touch the port-8080 files
        ds.delete(DatasetState::Collected).unwrap();
        assert!(!state_dir.join("20200601_80_certs.gz").exists());
        assert!(state_dir.join("20200601_8080_certs.gz").exists());
        assert!(state_dir.join("20200601_8080_hosts.gz").exists());
    }

    #[test]
    fn move_with_name_formatting() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("rapid_dump.gz");
        std::fs::write(&staged, "x").unwrap();

        let ds = Dataset::new(dir.path(), DatasetSource::Rapid, "20200601", "443").unwrap();
        let target = ds.move_to(DatasetState::Collected, &staged, true).unwrap();
        assert_eq!(
            target,
            dir.path().join("RAPID/COLLECTED/20200601_443_rapid_dump.gz")
        );
        assert!(!staged.exists());
    }
}
