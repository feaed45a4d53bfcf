//! Pipeline manager
//!
//! Ties one `(repository, source, date, ports, cpu_cores)` tuple to the
//! collector, unifier and analyser, and runs requested stages in their
//! canonical order. Artifacts produced by a stage in the same invocation
//! feed the next stage; otherwise a stage discovers its input on disk.

use crate::analyser::{ChainValidator, ValidatorOptions};
use crate::collector::Collector;
use crate::error::{PipelineError, Result};
use crate::unifier::{read_chains, Unifier};
use certvault_dataset::{Dataset, DatasetSource, DatasetState};
use certvault_store::{CertReader, CertWriter};
use certvault_verify::Verifier;
use chrono::NaiveDate;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

const CERTS_SUFFIX: &str = "certs";
const HOSTS_SUFFIX: &str = "hosts";
const CHAINS_SUFFIX: &str = "chains";
const BROKEN_CHAINS_SUFFIX: &str = "broken_chains";

/// Pipeline stages in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineTask {
    Collect,
    Filter,
    Unify,
    Analyse,
}

impl fmt::Display for PipelineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineTask::Collect => write!(f, "collect"),
            PipelineTask::Filter => write!(f, "filter"),
            PipelineTask::Unify => write!(f, "unify"),
            PipelineTask::Analyse => write!(f, "analyse"),
        }
    }
}

impl FromStr for PipelineTask {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "collect" => Ok(PipelineTask::Collect),
            "filter" => Ok(PipelineTask::Filter),
            "unify" => Ok(PipelineTask::Unify),
            "analyse" => Ok(PipelineTask::Analyse),
            other => Err(PipelineError::UnknownTask(other.to_string())),
        }
    }
}

/// Optional reducer between collection and unification. Reads one
/// collected dump and writes its filtered counterpart.
pub trait DatasetFilter {
    fn filter(&self, source: &Path, target: &Path) -> Result<()>;
}

/// Per-source pipeline manager.
pub struct DatasetManager {
    repository: PathBuf,
    source: DatasetSource,
    date: NaiveDate,
    date_id: String,
    ports: Vec<String>,
    cpu_cores: usize,
    collector: Option<Box<dyn Collector>>,
    filter: Option<Box<dyn DatasetFilter>>,
    methods: Vec<Arc<dyn Verifier>>,
}

impl DatasetManager {
    pub fn new(
        repository: &Path,
        source: DatasetSource,
        date: NaiveDate,
        ports: &[String],
        cpu_cores: usize,
    ) -> Self {
        let date_id = date.format("%Y%m%d").to_string();
        tracing::info!(
            "DatasetManager initialized: repository={}, source={source}, date={date}, cpu_cores={cpu_cores}",
            repository.display()
        );
        DatasetManager {
            repository: repository.to_path_buf(),
            source,
            date,
            date_id,
            ports: ports.to_vec(),
            cpu_cores,
            collector: None,
            filter: None,
            methods: Vec::new(),
        }
    }

    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_filter(mut self, filter: Box<dyn DatasetFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_methods(mut self, methods: Vec<Arc<dyn Verifier>>) -> Self {
        self.methods = methods;
        self
    }

    /// One dataset handle per configured port.
    fn datasets(&self) -> Result<Vec<Dataset>> {
        self.ports
            .iter()
            .map(|port| {
                Dataset::new(&self.repository, self.source, &self.date_id, port)
                    .map_err(PipelineError::from)
            })
            .collect()
    }

    /// Run a series of stages in canonical order, forwarding artifacts.
    pub fn run<S>(&self, tasks: &[PipelineTask], store: &Arc<S>) -> Result<()>
    where
        S: CertWriter + 'static,
    {
        let mut ordered = tasks.to_vec();
        ordered.sort();
        ordered.dedup();
        tracing::info!("Running pipeline stages: {:?}", ordered);

        let mut artifacts: Option<Vec<Dataset>> = None;
        for task in ordered {
            match task {
                PipelineTask::Collect => {
                    artifacts = Some(self.collect()?);
                }
                PipelineTask::Filter => {
                    self.filter_stage()?;
                }
                PipelineTask::Unify => {
                    let input = match artifacts.take() {
                        Some(datasets) => datasets,
                        None => self.datasets()?,
                    };
                    artifacts = Some(self.unify_datasets(&**store, &input)?);
                }
                PipelineTask::Analyse => {
                    let input = match artifacts.take() {
                        Some(datasets) => datasets,
                        None => self.datasets()?,
                    };
                    let reader: Arc<dyn CertReader> = store.clone();
                    self.analyse_datasets(reader, &input)?;
                }
            }
        }
        Ok(())
    }

    /// Collect raw dumps for the configured date and ports.
    pub fn collect(&self) -> Result<Vec<Dataset>> {
        tracing::info!("Collecting started");
        let collector = self.collector.as_ref().ok_or_else(|| {
            PipelineError::CollectionFailed("no collector configured".to_string())
        })?;
        let download_dir =
            self.repository.join(self.source.to_string()).join(DatasetState::Collected.to_string());
        let collected = collector.collect(
            &download_dir,
            self.date,
            &self.ports,
            &[HOSTS_SUFFIX.to_string(), CERTS_SUFFIX.to_string()],
        )?;
        tracing::info!("Collecting finished, {} files", collected.len());
        self.datasets()
    }

    /// Reduce collected dumps through the configured filter, if any.
    pub fn filter_stage(&self) -> Result<usize> {
        let Some(filter) = self.filter.as_ref() else {
            tracing::info!("No dataset filter configured, stage skipped");
            return Ok(0);
        };
        tracing::info!("Filtering started");
        let mut progressed = 0;
        for dataset in self.datasets()? {
            let target_dir = dataset.path(DatasetState::Filtered);
            std::fs::create_dir_all(&target_dir)?;
            for source in dataset.get(DatasetState::Collected, "")? {
                let Some(name) = source.file_name() else { continue };
                filter.filter(&source, &target_dir.join(name))?;
                progressed += 1;
            }
        }
        tracing::info!("Filtering finished, {progressed} files");
        Ok(progressed)
    }

    /// Unify every dataset of the configured date found on disk.
    pub fn unify(&self, store: &dyn CertWriter) -> Result<Vec<Dataset>> {
        let datasets = self.datasets()?;
        self.unify_datasets(store, &datasets)
    }

    fn unify_datasets(&self, store: &dyn CertWriter, datasets: &[Dataset]) -> Result<Vec<Dataset>> {
        tracing::info!("Unifying started");

        // Prefer filtered inputs over raw collected ones
        let mut unifiers: Vec<(Dataset, DatasetState, Unifier)> = Vec::new();
        for dataset in datasets {
            let input_state = if dataset.exists(DatasetState::Filtered) {
                DatasetState::Filtered
            } else {
                DatasetState::Collected
            };
            let certs = dataset.get(input_state, CERTS_SUFFIX)?.into_iter().next();
            let hosts = dataset.get(input_state, HOSTS_SUFFIX)?.into_iter().next();
            let (Some(certs), Some(hosts)) = (certs, hosts) else {
                tracing::warn!("No collected dump for dataset {dataset}, skipping");
                continue;
            };
            std::fs::create_dir_all(dataset.path(DatasetState::Unified))?;
            let chain_file = dataset.full_path(DatasetState::Unified, CHAINS_SUFFIX);
            let broken_file = dataset.full_path(DatasetState::Unified, BROKEN_CHAINS_SUFFIX);
            let unifier = Unifier::new(&certs, &hosts, &chain_file, Some(&broken_file))?;
            tracing::info!("Will unify dataset: {dataset}");
            unifiers.push((dataset.clone(), input_state, unifier));
        }

        // Store certificates first; chains can only be classified against
        // a fully staged certificate set.
        for (_, _, unifier) in unifiers.iter_mut() {
            if let Err(err) = unifier.store_certs(store) {
                tracing::error!("Error while streaming certs, rolling back: {err}");
                store.rollback()?;
                return Err(PipelineError::UnificationFailed(err.to_string()));
            }
        }
        for (dataset, _, unifier) in unifiers.iter_mut() {
            if let Err(err) = unifier.store_chains(store) {
                // Keep the successfully ingested certificates
                tracing::error!("Error while streaming hosts, committing: {err}");
                store.commit()?;
                return Err(PipelineError::UnificationFailed(err.to_string()));
            }
            let log_file = unifier.chain_file().with_extension("log");
            unifier.log().save(&log_file)?;
            tracing::debug!("Unified dataset {dataset}");
        }
        store.commit()?;

        // Consume the raw inputs, the unified chain files replace them
        let mut unified = Vec::with_capacity(unifiers.len());
        for (dataset, input_state, _) in unifiers {
            dataset.delete(input_state)?;
            unified.push(dataset);
        }
        tracing::info!("Unifying finished, {} datasets progressed", unified.len());
        Ok(unified)
    }

    /// Analyse every unified dataset of the configured date found on disk.
    pub fn analyse(&self, store: Arc<dyn CertReader>) -> Result<usize> {
        let datasets = self.datasets()?;
        self.analyse_datasets(store, &datasets)
    }

    fn analyse_datasets(&self, store: Arc<dyn CertReader>, datasets: &[Dataset]) -> Result<usize> {
        tracing::info!("Analysing started");
        if self.methods.is_empty() {
            return Err(PipelineError::AnalysisFailed(
                "no verification methods configured".to_string(),
            ));
        }
        let reference_time = self
            .date
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp();

        let mut progressed = 0;
        for dataset in datasets {
            let chain_file = dataset.full_path(DatasetState::Unified, CHAINS_SUFFIX);
            if !chain_file.is_file() {
                tracing::warn!("No unified chain file for dataset {dataset}, skipping");
                continue;
            }
            std::fs::create_dir_all(dataset.path(DatasetState::Analysed))?;
            let output = dataset
                .clone()
                .with_extension("csv")
                .full_path(DatasetState::Analysed, "");

            let mut validator = ChainValidator::new(
                &output,
                self.cpu_cores,
                ValidatorOptions {
                    store: store.clone(),
                    reference_time,
                    methods: self.methods.clone(),
                    export_dir: None,
                },
            )?;
            for record in read_chains(&chain_file)? {
                let (host, chain) = record?;
                validator.schedule(&host, chain)?;
            }
            let scheduled = validator.done()?;
            tracing::info!("Analysed {scheduled} hosts into {}", output.display());
            progressed += 1;
        }
        tracing::info!("Analysing finished, {progressed} datasets progressed");
        Ok(progressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certvault_store::{CertFileStore, SetupOptions};
    use certvault_verify::FnVerifier;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_gz(path: &Path, content: &str) {
        let mut enc =
            GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    fn manager(repo: &Path, mirror: &Path) -> DatasetManager {
        DatasetManager::new(
            repo,
            DatasetSource::Rapid,
            NaiveDate::parse_from_str("2020-06-01", "%Y-%m-%d").unwrap(),
            &["443".to_string()],
            0,
        )
        .with_collector(Box::new(crate::collector::LocalMirrorCollector::new(mirror)))
        .with_methods(vec![FnVerifier::new("always0", |_, _| "0".to_string())])
    }

    fn seed_mirror(mirror: &Path) {
        write_gz(
            &mirror.join("20200601-1591000000-https_get_443_certs.gz"),
            "aa000001,QUJD\nbb000002,REVG\n",
        );
        write_gz(
            &mirror.join("20200601-1591000000-https_get_443_hosts.gz"),
            "h1,aa000001\nh2,aa000001\nh2,bb000002\nh3,ff000009\n",
        );
    }

    #[test]
    fn full_pipeline_out_of_order_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let mirror = dir.path().join("mirror");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::create_dir_all(&mirror).unwrap();
        seed_mirror(&mirror);

        CertFileStore::setup(&dir.path().join("store"), SetupOptions::default()).unwrap();
        let store = Arc::new(CertFileStore::open(&dir.path().join("store")).unwrap());

        let manager = manager(&repo, &mirror);
        manager
            .run(
                &[PipelineTask::Analyse, PipelineTask::Unify, PipelineTask::Collect],
                &store,
            )
            .unwrap();

        // Unify consumed the collected dumps and produced chain files
        assert!(!repo.join("RAPID/COLLECTED/20200601_443_certs.gz").exists());
        assert!(repo.join("RAPID/UNIFIED/20200601_443_chains.gz").exists());
        assert!(repo.join("RAPID/UNIFIED/20200601_443_chains.log").exists());

        use certvault_store::CertReader;
        assert!(store.exists("aa000001"));
        assert!(store.exists("bb000002"));

        let csv = std::fs::read_to_string(repo.join("RAPID/ANALYSED/20200601_443.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "HOST, always0, CHAIN");
        assert!(lines.contains(&"h1, 0, aa000001"));
        assert!(lines.contains(&"h2, 0, aa000001 -> bb000002"));
        // h3's chain is broken and never reaches the analyser
        assert!(!csv.contains("h3"));
    }

    #[test]
    fn unify_discovers_datasets_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let collected = repo.join("RAPID/COLLECTED");
        std::fs::create_dir_all(&collected).unwrap();
        write_gz(&collected.join("20200601_443_certs.gz"), "aa000001,QUJD\n");
        write_gz(&collected.join("20200601_443_hosts.gz"), "h1,aa000001\n");

        CertFileStore::setup(&dir.path().join("store"), SetupOptions::default()).unwrap();
        let store = CertFileStore::open(&dir.path().join("store")).unwrap();

        let mirror = dir.path().join("mirror");
        std::fs::create_dir_all(&mirror).unwrap();
        let manager = manager(&repo, &mirror);
        let unified = manager.unify(&store).unwrap();
        assert_eq!(unified.len(), 1);
        assert!(repo.join("RAPID/UNIFIED/20200601_443_chains.gz").exists());
    }

    #[test]
    fn collect_without_collector_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatasetManager::new(
            dir.path(),
            DatasetSource::Rapid,
            NaiveDate::parse_from_str("2020-06-01", "%Y-%m-%d").unwrap(),
            &["443".to_string()],
            0,
        );
        assert!(matches!(manager.collect(), Err(PipelineError::CollectionFailed(_))));
    }

    #[test]
    fn tasks_parse_and_order() {
        let mut tasks = vec![
            "analyse".parse::<PipelineTask>().unwrap(),
            "collect".parse::<PipelineTask>().unwrap(),
            "unify".parse::<PipelineTask>().unwrap(),
        ];
        tasks.sort();
        assert_eq!(
            tasks,
            vec![PipelineTask::Collect, PipelineTask::Unify, PipelineTask::Analyse]
        );
        assert!("mangle".parse::<PipelineTask>().is_err());
    }
}
