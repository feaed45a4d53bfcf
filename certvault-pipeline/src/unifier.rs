//! Dataset unifier
//!
//! Streams the two raw scan dumps of one dataset: the certs dump
//! (`id,base64` lines) and the hosts dump (`host,id` lines, equal hosts
//! contiguous). Certificates are staged into the store; host chains are
//! written to a gzip chain file, split into whole and broken chains when a
//! broken-chain file is requested. The unifier never commits, that is the
//! orchestrator's call.

use crate::error::{PipelineError, Result};
use certvault_core::base64_to_pem;
use certvault_store::{CertReader, CertWriter};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Counters of one unification run, written to a side-car log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnifyLog {
    pub total_certs: u64,
    pub total_hosts: u64,
    pub total_host_certs: u64,
    /// -1 when no broken-chain file was requested.
    pub broken_chains: i64,
}

impl UnifyLog {
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::UnificationFailed(format!("cannot serialize log: {e}")))?;
        tracing::info!("Saving unification log: {}", path.display());
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// One-pass unifier over a certs dump and a hosts dump.
pub struct Unifier {
    certs_dataset: PathBuf,
    hosts_dataset: PathBuf,
    chain_file: PathBuf,
    broken_chain_file: Option<PathBuf>,
    log: UnifyLog,
}

impl Unifier {
    pub fn new(
        certs_dataset: &Path,
        hosts_dataset: &Path,
        chain_file: &Path,
        broken_chain_file: Option<&Path>,
    ) -> Result<Self> {
        for input in [certs_dataset, hosts_dataset] {
            if !input.is_file() {
                return Err(PipelineError::UnificationFailed(format!(
                    "dataset file not found: {}",
                    input.display()
                )));
            }
        }
        tracing::info!(
            "Initializing unifier for dataset files ({}:{})",
            certs_dataset.display(),
            hosts_dataset.display()
        );
        Ok(Unifier {
            certs_dataset: certs_dataset.to_path_buf(),
            hosts_dataset: hosts_dataset.to_path_buf(),
            chain_file: chain_file.to_path_buf(),
            broken_chain_file: broken_chain_file.map(Path::to_path_buf),
            log: UnifyLog::default(),
        })
    }

    pub fn chain_file(&self) -> &Path {
        &self.chain_file
    }

    pub fn log(&self) -> &UnifyLog {
        &self.log
    }

    /// Stream the certs dump into the store, one insert per line.
    pub fn store_certs(&mut self, store: &dyn CertWriter) -> Result<()> {
        tracing::info!("Start parsing certificates from {}", self.certs_dataset.display());
        let reader = BufReader::new(GzDecoder::new(File::open(&self.certs_dataset)?));
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (cert_id, body) = split_pair(&line)?;
            store.insert(cert_id, &base64_to_pem(body))?;
            self.log.total_certs += 1;
        }
        Ok(())
    }

    /// Stream the hosts dump, building one chain per host run and writing
    /// it to the chain file (or the broken-chain file when some id of the
    /// chain is not available in the store).
    pub fn store_chains(&mut self, store: &dyn CertReader) -> Result<()> {
        tracing::info!("Start building host chains from {}", self.hosts_dataset.display());
        let mut full = chain_writer(&self.chain_file)?;
        let mut broken = match &self.broken_chain_file {
            Some(path) => Some(chain_writer(path)?),
            None => {
                self.log.broken_chains = -1;
                None
            }
        };

        let reader = BufReader::new(GzDecoder::new(File::open(&self.hosts_dataset)?));
        let mut current: Option<String> = None;
        let mut chain: Vec<String> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (host, cert_id) = split_pair(&line)?;
            if current.as_deref().is_some_and(|last| last != host) {
                let finished = current.take().unwrap_or_default();
                self.write_chain(store, &finished, &std::mem::take(&mut chain), &mut full, &mut broken)?;
            }
            chain.push(cert_id.to_string());
            current = Some(host.to_string());
        }
        if let Some(host) = current {
            self.write_chain(store, &host, &std::mem::take(&mut chain), &mut full, &mut broken)?;
        }

        full.finish()?.flush()?;
        if let Some(broken) = broken {
            broken.finish()?.flush()?;
        }
        Ok(())
    }

    fn write_chain(
        &mut self,
        store: &dyn CertReader,
        host: &str,
        chain: &[String],
        full: &mut GzEncoder<BufWriter<File>>,
        broken: &mut Option<GzEncoder<BufWriter<File>>>,
    ) -> Result<()> {
        self.log.total_hosts += 1;
        self.log.total_host_certs += chain.len() as u64;
        let line = format!("{},{}\n", host, chain.join(","));
        match broken {
            Some(broken) if !store.exists_all(chain) => {
                self.log.broken_chains += 1;
                broken.write_all(line.as_bytes())?;
            }
            _ => full.write_all(line.as_bytes())?,
        }
        Ok(())
    }
}

fn chain_writer(path: &Path) -> Result<GzEncoder<BufWriter<File>>> {
    Ok(GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default()))
}

fn split_pair(line: &str) -> Result<(&str, &str)> {
    line.split_once(',')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| PipelineError::UnificationFailed(format!("malformed line <{line}>")))
}

/// Iterator over a unified chain file, yielding `(host, chain)` records.
pub fn read_chains(path: &Path) -> Result<ChainReader> {
    tracing::info!("Start reading certificate chains from {}", path.display());
    let reader = BufReader::new(GzDecoder::new(File::open(path)?));
    Ok(ChainReader { lines: reader.lines() })
}

pub struct ChainReader {
    lines: std::io::Lines<BufReader<GzDecoder<File>>>,
}

impl Iterator for ChainReader {
    type Item = Result<(String, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let mut parts = line.split(',').map(str::to_string);
                    let host = parts.next().unwrap_or_default();
                    return Some(Ok((host, parts.collect())));
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certvault_store::{CertFileStore, SetupOptions};
    use std::io::Read;

    fn write_gz(path: &Path, content: &str) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    fn read_gz(path: &Path) -> String {
        let mut text = String::new();
        GzDecoder::new(File::open(path).unwrap()).read_to_string(&mut text).unwrap();
        text
    }

    fn open_store(dir: &Path) -> CertFileStore {
        CertFileStore::setup(dir, SetupOptions::default()).unwrap();
        CertFileStore::open(dir).unwrap()
    }

    #[test]
    fn splits_whole_and_broken_chains() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs.gz");
        let hosts = dir.path().join("hosts.gz");
        let chains = dir.path().join("chains.gz");
        let broken = dir.path().join("broken.gz");
        write_gz(&certs, "aa000001,QUJD\n");
        write_gz(&hosts, "h1,aa000001\nh2,aa000001\nh2,bb000002\n");

        let store = open_store(&dir.path().join("store"));
        let mut unifier = Unifier::new(&certs, &hosts, &chains, Some(&broken)).unwrap();
        unifier.store_certs(&store).unwrap();
        unifier.store_chains(&store).unwrap();

        assert_eq!(read_gz(&chains), "h1,aa000001\n");
        assert_eq!(read_gz(&broken), "h2,aa000001,bb000002\n");

        let log = unifier.log();
        assert_eq!(log.total_certs, 1);
        assert_eq!(log.total_hosts, 2);
        assert_eq!(log.total_host_certs, 3);
        assert_eq!(log.broken_chains, 1);
    }

    #[test]
    fn without_broken_file_everything_lands_in_the_chain_file() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs.gz");
        let hosts = dir.path().join("hosts.gz");
        let chains = dir.path().join("chains.gz");
        write_gz(&certs, "aa000001,QUJD\n");
        write_gz(&hosts, "h1,aa000001\nh2,ff000009\n");

        let store = open_store(&dir.path().join("store"));
        let mut unifier = Unifier::new(&certs, &hosts, &chains, None).unwrap();
        unifier.store_certs(&store).unwrap();
        unifier.store_chains(&store).unwrap();

        assert_eq!(read_gz(&chains), "h1,aa000001\nh2,ff000009\n");
        assert_eq!(unifier.log().broken_chains, -1);
    }

    #[test]
    fn host_order_is_preserved_and_certs_land_in_store() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs.gz");
        let hosts = dir.path().join("hosts.gz");
        let chains = dir.path().join("chains.gz");
        let broken = dir.path().join("broken.gz");
        write_gz(&certs, "aa000001,QUJD\nbb000002,REVG\ncc000003,R0hJ\n");
        write_gz(&hosts, "h9,aa000001\nh1,bb000002\nh1,cc000003\nh5,aa000001\n");

        let store = open_store(&dir.path().join("store"));
        let mut unifier = Unifier::new(&certs, &hosts, &chains, Some(&broken)).unwrap();
        unifier.store_certs(&store).unwrap();
        unifier.store_chains(&store).unwrap();

        // Input order, not sorted order
        assert_eq!(read_gz(&chains), "h9,aa000001\nh1,bb000002,cc000003\nh5,aa000001\n");
        assert_eq!(read_gz(&broken), "");

        use certvault_store::CertReader;
        assert_eq!(store.get("aa000001").unwrap(), base64_to_pem("QUJD"));

        let parsed: Vec<_> = read_chains(&chains).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].0, "h1");
        assert_eq!(parsed[1].1, vec!["bb000002".to_string(), "cc000003".to_string()]);
    }

    #[test]
    fn missing_input_fails_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs.gz");
        write_gz(&certs, "aa000001,QUJD\n");
        let missing = dir.path().join("nope.gz");
        assert!(matches!(
            Unifier::new(&certs, &missing, &dir.path().join("chains.gz"), None),
            Err(PipelineError::UnificationFailed(_))
        ));
    }

    #[test]
    fn unify_log_side_car_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = UnifyLog::default();
        log.total_certs = 7;
        let path = dir.path().join("chains.log");
        log.save(&path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"total_certs\": 7"));
    }
}
