//! Chain validation analyser
//!
//! Drives the configured verifier back-ends over unified chain files and
//! writes one CSV row per host:
//! `host, method1 result, ..., methodN result, id1 -> id2 -> ... -> idN`
//!
//! Work is either done inline (`workers == 0`) or handed to a pool of
//! worker threads feeding a dedicated writer thread. The export directory
//! is shared by all workers and guarded by a lock, since two workers may
//! want to export the same certificate at the same time.

use crate::error::{PipelineError, Result};
use certvault_core::pem_filename;
use certvault_store::{CertReader, StoreError};
use certvault_verify::{Verifier, VerifyContext};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Options of a [`ChainValidator`].
pub struct ValidatorOptions {
    /// Store the chain certificates are exported from.
    pub store: Arc<dyn CertReader>,
    /// Historical moment the chains are evaluated at, epoch seconds.
    pub reference_time: i64,
    /// Verifier back-ends, in CSV column order.
    pub methods: Vec<Arc<dyn Verifier>>,
    /// Directory for exported PEM files. A private directory is created
    /// (and cleaned up on `done`) when not given.
    pub export_dir: Option<PathBuf>,
}

/// Everything one validation task needs, owned per worker.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn CertReader>,
    export_dir: PathBuf,
    methods: Vec<Arc<dyn Verifier>>,
    ctx: VerifyContext,
    export_lock: Arc<Mutex<()>>,
}

impl Worker {
    /// Validate one chain and format its CSV row. A broken chain yields an
    /// empty row.
    fn validate(&self, host: &str, chain: &[String]) -> String {
        let mut pems = Vec::with_capacity(chain.len());
        {
            let _guard = self.export_lock.lock();
            for cert_id in chain {
                let exported = self.export_dir.join(pem_filename(cert_id));
                let path = if exported.exists() {
                    exported
                } else {
                    match self.store.export(cert_id, &self.export_dir, false) {
                        Ok(path) => path,
                        Err(StoreError::NotAvailable(_)) => {
                            tracing::info!("HOST <{host}> has broken chain");
                            return String::new();
                        }
                        Err(err) => {
                            tracing::warn!("export of <{cert_id}> failed: {err}");
                            return String::new();
                        }
                    }
                };
                pems.push(path);
            }
        }

        let results: Vec<String> =
            self.methods.iter().map(|method| method.verify(&pems, &self.ctx)).collect();
        format!("{}, {}, {}\n", host, results.join(", "), chain.join(" -> "))
    }
}

enum Mode {
    /// Inline validation on the calling thread.
    Single { worker: Worker, out: BufWriter<File> },
    /// Bounded pool of worker threads plus one writer thread.
    Pool {
        jobs: Sender<(String, Vec<String>)>,
        workers: Vec<JoinHandle<()>>,
        writer: JoinHandle<std::io::Result<()>>,
    },
}

/// Scoped analyser resource. `schedule` chains, then `done` exactly once;
/// dropping without `done` abandons the pool without waiting for it.
pub struct ChainValidator {
    mode: Option<Mode>,
    export_dir: PathBuf,
    cleanup_export_dir: bool,
    scheduled: u64,
}

impl ChainValidator {
    /// Create an analyser writing to `output_file`. `workers == 0` runs
    /// synchronously on the calling thread.
    pub fn new(output_file: &Path, workers: usize, options: ValidatorOptions) -> Result<Self> {
        if options.methods.is_empty() {
            return Err(PipelineError::AnalysisFailed(
                "no verification methods are available".to_string(),
            ));
        }

        let (export_dir, cleanup_export_dir) = match options.export_dir {
            Some(dir) => (dir, false),
            None => (std::env::temp_dir().join("certvault_chain_validator"), true),
        };
        std::fs::create_dir_all(&export_dir)?;

        let mut out = BufWriter::new(File::create(output_file)?);
        let names: Vec<&str> = options.methods.iter().map(|m| m.name()).collect();
        writeln!(out, "HOST, {}, CHAIN", names.join(", "))?;

        let worker = Worker {
            store: options.store,
            export_dir: export_dir.clone(),
            methods: options.methods,
            ctx: VerifyContext { reference_time: Some(options.reference_time) },
            export_lock: Arc::new(Mutex::new(())),
        };

        let mode = if workers == 0 {
            Mode::Single { worker, out }
        } else {
            let (job_tx, job_rx) = unbounded::<(String, Vec<String>)>();
            let (row_tx, row_rx) = unbounded::<String>();
            let handles = (0..workers)
                .map(|_| spawn_worker(worker.clone(), job_rx.clone(), row_tx.clone()))
                .collect();
            drop(row_tx);
            let writer = std::thread::spawn(move || write_rows(out, row_rx));
            Mode::Pool { jobs: job_tx, workers: handles, writer }
        };

        tracing::info!(
            "ChainValidator created: output_file={}, workers={}",
            output_file.display(),
            workers
        );
        Ok(ChainValidator { mode: Some(mode), export_dir, cleanup_export_dir, scheduled: 0 })
    }

    /// Enqueue one host chain. Non-blocking in pool mode; result rows land
    /// in the output file in arbitrary order.
    pub fn schedule(&mut self, host: &str, chain: Vec<String>) -> Result<()> {
        self.scheduled += 1;
        match self.mode.as_mut() {
            Some(Mode::Single { worker, out }) => {
                let row = worker.validate(host, &chain);
                out.write_all(row.as_bytes())?;
                Ok(())
            }
            Some(Mode::Pool { jobs, .. }) => jobs
                .send((host.to_string(), chain))
                .map_err(|_| PipelineError::AnalysisFailed("worker pool is gone".to_string())),
            None => Err(PipelineError::AnalysisFailed("analyser already closed".to_string())),
        }
    }

    /// Close the pool, wait for every scheduled chain to land, flush and
    /// close the output, and remove a self-created export directory.
    pub fn done(&mut self) -> Result<u64> {
        match self.mode.take() {
            Some(Mode::Single { mut out, .. }) => {
                out.flush()?;
            }
            Some(Mode::Pool { jobs, workers, writer }) => {
                drop(jobs);
                for handle in workers {
                    if handle.join().is_err() {
                        tracing::error!("analyser worker panicked");
                    }
                }
                match writer.join() {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(PipelineError::AnalysisFailed(
                            "output writer panicked".to_string(),
                        ));
                    }
                }
            }
            None => {}
        }
        if self.cleanup_export_dir && self.export_dir.exists() {
            std::fs::remove_dir_all(&self.export_dir)?;
        }
        Ok(self.scheduled)
    }
}

impl Drop for ChainValidator {
    fn drop(&mut self) {
        if self.mode.take().is_some() {
            tracing::warn!("ChainValidator dropped without done(), abandoning in-flight work");
        }
    }
}

fn spawn_worker(
    worker: Worker,
    jobs: Receiver<(String, Vec<String>)>,
    rows: Sender<String>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok((host, chain)) = jobs.recv() {
            let row = worker.validate(&host, &chain);
            if rows.send(row).is_err() {
                break;
            }
        }
    })
}

fn write_rows(mut out: BufWriter<File>, rows: Receiver<String>) -> std::io::Result<()> {
    while let Ok(row) = rows.recv() {
        out.write_all(row.as_bytes())?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use certvault_store::{CertFileStore, CertWriter, SetupOptions};
    use certvault_verify::FnVerifier;

    fn store_with(certs: &[(&str, &str)], dir: &Path) -> Arc<CertFileStore> {
        CertFileStore::setup(dir, SetupOptions::default()).unwrap();
        let store = CertFileStore::open(dir).unwrap();
        for (id, body) in certs {
            store.insert(id, body).unwrap();
        }
        store.commit().unwrap();
        Arc::new(store)
    }

    #[test]
    fn synchronous_row_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&[("aa000001", "PEM-A"), ("bb000002", "PEM-B")], &dir.path().join("store"));
        let output = dir.path().join("result.csv");

        let mut validator = ChainValidator::new(
            &output,
            0,
            ValidatorOptions {
                store,
                reference_time: 1_600_000_000,
                methods: vec![FnVerifier::new("always0", |chain, ctx| {
                    assert_eq!(chain.len(), 2);
                    assert_eq!(ctx.reference_time, Some(1_600_000_000));
                    "0".to_string()
                })],
                export_dir: Some(dir.path().join("export")),
            },
        )
        .unwrap();

        validator
            .schedule("h", vec!["aa000001".to_string(), "bb000002".to_string()])
            .unwrap();
        validator.done().unwrap();

        let text = std::fs::read_to_string(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "HOST, always0, CHAIN");
        assert_eq!(lines[1], "h, 0, aa000001 -> bb000002");
        // Exported PEMs stay when the export dir was caller-provided
        assert!(dir.path().join("export/aa000001.pem").exists());
    }

    #[test]
    fn broken_chain_yields_empty_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&[("aa000001", "PEM-A")], &dir.path().join("store"));
        let output = dir.path().join("result.csv");

        let mut validator = ChainValidator::new(
            &output,
            0,
            ValidatorOptions {
                store,
                reference_time: 0,
                methods: vec![FnVerifier::new("always0", |_, _| "0".to_string())],
                export_dir: Some(dir.path().join("export")),
            },
        )
        .unwrap();

        validator
            .schedule("broken", vec!["aa000001".to_string(), "dead0000".to_string()])
            .unwrap();
        validator.schedule("ok", vec!["aa000001".to_string()]).unwrap();
        validator.done().unwrap();

        let text = std::fs::read_to_string(output).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().any(|l| l == "ok, 0, aa000001"));
        assert!(!text.contains("broken"));
    }

    #[test]
    fn pool_mode_lands_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<String> = (0..40).map(|i| format!("{i:02x}aa{i:04x}")).collect();
        let certs: Vec<(String, String)> =
            ids.iter().map(|id| (id.clone(), format!("PEM {id}"))).collect();
        let cert_refs: Vec<(&str, &str)> =
            certs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let store = store_with(&cert_refs, &dir.path().join("store"));
        let output = dir.path().join("result.csv");

        let mut validator = ChainValidator::new(
            &output,
            4,
            ValidatorOptions {
                store,
                reference_time: 0,
                methods: vec![
                    FnVerifier::new("m1", |_, _| "0".to_string()),
                    FnVerifier::new("m2", |_, _| "20".to_string()),
                ],
                export_dir: Some(dir.path().join("export")),
            },
        )
        .unwrap();

        for (i, id) in ids.iter().enumerate() {
            validator.schedule(&format!("host{i}"), vec![id.clone()]).unwrap();
        }
        assert_eq!(validator.done().unwrap(), 40);

        let text = std::fs::read_to_string(output).unwrap();
        assert_eq!(text.lines().count(), 41);
        assert_eq!(text.lines().next().unwrap(), "HOST, m1, m2, CHAIN");
        assert!(text.lines().any(|l| l == "host0, 0, 20, 00aa0000"));
    }

    #[test]
    fn refuses_empty_method_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&[("aa000001", "PEM-A")], &dir.path().join("store"));
        let result = ChainValidator::new(
            &dir.path().join("result.csv"),
            0,
            ValidatorOptions {
                store,
                reference_time: 0,
                methods: vec![],
                export_dir: None,
            },
        );
        assert!(matches!(result, Err(PipelineError::AnalysisFailed(_))));
    }
}
