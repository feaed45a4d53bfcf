//! Dataset collectors
//!
//! A collector pulls the raw dump files of one scan date into the
//! COLLECTED directory of a repository, named canonically as
//! `<date>_<port>_<type>.gz`. The transport (HTTP APIs, mirrors) is the
//! collector's business; the pipeline only relies on this contract.

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Contract of a dataset collector.
pub trait Collector {
    /// Collect the newest datasets at or before `date` into
    /// `download_dir`, filtered by ports and dump types (`certs`,
    /// `hosts`). Returns the collected file paths. Files already present
    /// are kept, making the stage idempotent.
    fn collect(
        &self,
        download_dir: &Path,
        date: NaiveDate,
        filter_ports: &[String],
        filter_types: &[String],
    ) -> Result<Vec<PathBuf>>;
}

/// Raw dump names follow `<date:8>..._<port>_<type>.gz`.
fn dump_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<date>\d{8}).*_(?P<port>\d+)_(?P<type>\w+)\.gz$").expect("dump name regex")
    })
}

/// Collector reading from a local directory of raw dumps, for offline
/// repositories and tests.
pub struct LocalMirrorCollector {
    mirror: PathBuf,
}

impl LocalMirrorCollector {
    pub fn new(mirror: &Path) -> Self {
        LocalMirrorCollector { mirror: mirror.to_path_buf() }
    }
}

impl Collector for LocalMirrorCollector {
    fn collect(
        &self,
        download_dir: &Path,
        date: NaiveDate,
        filter_ports: &[String],
        filter_types: &[String],
    ) -> Result<Vec<PathBuf>> {
        tracing::info!(
            "Start collecting datasets for {date} from mirror {}",
            self.mirror.display()
        );
        let wanted_date = date.format("%Y%m%d").to_string();

        struct Candidate {
            path: PathBuf,
            date: String,
            port: String,
            kind: String,
        }

        // Newest dump date at or before the requested one
        let mut candidates: Vec<Candidate> = Vec::new();
        for entry in std::fs::read_dir(&self.mirror)
            .map_err(|e| PipelineError::CollectionFailed(format!("cannot read mirror: {e}")))?
        {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let Some(caps) = dump_name_regex().captures(&name) else {
                continue;
            };
            if !filter_ports.is_empty() && !filter_ports.iter().any(|p| p == &caps["port"]) {
                continue;
            }
            if !filter_types.is_empty() && !filter_types.iter().any(|t| t == &caps["type"]) {
                continue;
            }
            if &caps["date"] > wanted_date.as_str() {
                continue;
            }
            candidates.push(Candidate {
                path,
                date: caps["date"].to_string(),
                port: caps["port"].to_string(),
                kind: caps["type"].to_string(),
            });
        }
        let Some(target_date) = candidates.iter().map(|c| c.date.clone()).max() else {
            return Err(PipelineError::CollectionFailed(format!(
                "no dataset at or before {date} in {}",
                self.mirror.display()
            )));
        };

        std::fs::create_dir_all(download_dir)?;
        let mut collected = Vec::new();
        for candidate in candidates {
            if candidate.date != target_date {
                continue;
            }
            let canonical = download_dir
                .join(format!("{}_{}_{}.gz", candidate.date, candidate.port, candidate.kind));
            if canonical.exists() {
                tracing::info!("Dataset {} is already collected", canonical.display());
            } else {
                tracing::info!(
                    "Collect dump <{}> to <{}>",
                    candidate.path.display(),
                    canonical.display()
                );
                std::fs::copy(&candidate.path, &canonical)?;
            }
            collected.push(canonical);
        }
        tracing::info!("Collected {} dataset files", collected.len());
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn collects_newest_dumps_at_or_before_date() {
        let mirror = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        for name in [
            "20200601-1591000000-https_get_443_certs.gz",
            "20200601-1591000000-https_get_443_hosts.gz",
            "20200501-1588300000-https_get_443_certs.gz",
            "20200701-1593500000-https_get_443_certs.gz",
            "20200601-1591000000-https_get_8443_certs.gz",
            "README.txt",
        ] {
            std::fs::write(mirror.path().join(name), "x").unwrap();
        }

        let collector = LocalMirrorCollector::new(mirror.path());
        let collected = collector
            .collect(
                target.path(),
                date("2020-06-15"),
                &["443".to_string()],
                &["certs".to_string(), "hosts".to_string()],
            )
            .unwrap();

        let mut names: Vec<_> = collected
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["20200601_443_certs.gz", "20200601_443_hosts.gz"]);
    }

    #[test]
    fn empty_mirror_is_a_collection_failure() {
        let mirror = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let collector = LocalMirrorCollector::new(mirror.path());
        assert!(matches!(
            collector.collect(target.path(), date("2020-06-15"), &[], &[]),
            Err(PipelineError::CollectionFailed(_))
        ));
    }
}
