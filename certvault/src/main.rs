//! Certvault - TLS scan ingestion and historical chain validation
//!
//! This is the main entry point for the Certvault CLI.

use anyhow::Context;
use certvault_dataset::{DatasetRepository, DatasetSource, DatasetState};
use certvault_pipeline::{DatasetManager, LocalMirrorCollector, PipelineTask};
use certvault_store::{
    CertFileStore, CertFormat, CertReader, CertWriter, CompressionKind, SetupOptions,
};
use certvault_verify::VerifierRegistry;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Certvault - ingest TLS scan dumps, deduplicate certificates, validate
/// chains at historical reference dates
#[derive(Parser)]
#[command(name = "certvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage a certificate store
    #[command(subcommand)]
    Store(StoreCommands),

    /// Inspect a dataset repository
    Repo {
        /// Repository root directory
        directory: PathBuf,

        /// Source to filter
        #[arg(long)]
        source: Option<String>,

        /// State to filter
        #[arg(long)]
        state: Option<String>,

        /// Date prefix to filter (YYYY, YYYYMM or YYYYMMDD)
        #[arg(long, default_value = "")]
        date: String,
    },

    /// Run pipeline stages over one scan date
    Run {
        /// Repository root directory
        repository: PathBuf,

        /// Certificate store directory
        #[arg(long)]
        store: PathBuf,

        /// Scan source
        #[arg(long, default_value = "rapid")]
        source: String,

        /// Scan date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Scanned ports
        #[arg(long, default_values_t = [String::from("443")])]
        ports: Vec<String>,

        /// Worker count for commit and analysis (0 = single thread)
        #[arg(long, default_value_t = 0)]
        cpus: usize,

        /// Local mirror directory for the collect stage
        #[arg(long)]
        mirror: Option<PathBuf>,

        /// Verification methods to run (default: all available)
        #[arg(long)]
        methods: Vec<String>,

        /// Stages to run
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Set up a new store directory
    Setup {
        storage: PathBuf,

        /// Hierarchy depth of the block tree
        #[arg(long, default_value_t = 2)]
        level: usize,

        /// Certificate text format kept in the store
        #[arg(long, default_value = "PEM")]
        format: String,

        /// Compression of block archive members
        #[arg(long, default_value = "ZIP_DEFLATED")]
        compression: String,

        #[arg(long, default_value = "Certvault certificate store")]
        description: String,

        #[arg(long, default_value = "")]
        owner: String,

        /// Keep metadata and commit history
        #[arg(long)]
        maintain_info: bool,
    },

    /// Insert certificates from PEM files and commit
    Insert {
        storage: PathBuf,

        /// PEM files named `<id>.pem`
        files: Vec<PathBuf>,
    },

    /// Print a certificate
    Get { storage: PathBuf, id: String },

    /// Export a certificate into a directory
    Export { storage: PathBuf, id: String, target_dir: PathBuf },

    /// Check whether certificates exist
    Exists { storage: PathBuf, ids: Vec<String> },

    /// Delete certificates and commit
    Delete { storage: PathBuf, ids: Vec<String> },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Store(command) => run_store(command),
        Commands::Repo { directory, source, state, date } => {
            let repo = DatasetRepository::new(&directory)?;
            let source = source.map(|s| s.parse::<DatasetSource>()).transpose()?;
            let state = state.map(|s| s.parse::<DatasetState>()).transpose()?;
            print!("{}", repo.dumps(source, state, &date)?);
            Ok(())
        }
        Commands::Run { repository, store, source, date, ports, cpus, mirror, methods, tasks } => {
            run_pipeline(repository, store, source, date, ports, cpus, mirror, methods, tasks)
        }
        Commands::Version => {
            println!("certvault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_store(command: StoreCommands) -> anyhow::Result<()> {
    match command {
        StoreCommands::Setup { storage, level, format, compression, description, owner, maintain_info } => {
            let cert_format = match format.to_ascii_uppercase().as_str() {
                "PEM" => CertFormat::Pem,
                "DER" => CertFormat::Der,
                other => anyhow::bail!("unknown certificate format <{other}>"),
            };
            let compression_method = match compression.to_ascii_uppercase().as_str() {
                "ZIP_STORED" => CompressionKind::Stored,
                "ZIP_DEFLATED" => CompressionKind::Deflated,
                other => anyhow::bail!("unknown compression method <{other}>"),
            };
            CertFileStore::setup(
                &storage,
                SetupOptions {
                    structure_level: level,
                    cert_format,
                    compression_method,
                    description,
                    owner,
                    maintain_info,
                },
            )?;
            println!("Store set up at {}", storage.display());
            Ok(())
        }
        StoreCommands::Insert { storage, files } => {
            let store = CertFileStore::open(&storage)?;
            for file in &files {
                let id = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .context("certificate file has no name")?;
                let content = std::fs::read_to_string(file)
                    .with_context(|| format!("cannot read {}", file.display()))?;
                store.insert(&id, &content)?;
            }
            let (inserted, _) = store.commit()?;
            println!("Inserted {inserted} certificates");
            Ok(())
        }
        StoreCommands::Get { storage, id } => {
            let store = CertFileStore::open(&storage)?;
            print!("{}", store.get(&id)?);
            Ok(())
        }
        StoreCommands::Export { storage, id, target_dir } => {
            let store = CertFileStore::open(&storage)?;
            std::fs::create_dir_all(&target_dir)?;
            let path = store.export(&id, &target_dir, true)?;
            println!("{}", path.display());
            Ok(())
        }
        StoreCommands::Exists { storage, ids } => {
            let store = CertFileStore::open(&storage)?;
            if store.exists_all(&ids) {
                println!("true");
                Ok(())
            } else {
                println!("false");
                anyhow::bail!("not all certificates exist")
            }
        }
        StoreCommands::Delete { storage, ids } => {
            let store = CertFileStore::open(&storage)?;
            for id in &ids {
                store.delete(id)?;
            }
            let (_, deleted) = store.commit()?;
            println!("Deleted {deleted} certificates");
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    repository: PathBuf,
    store_path: PathBuf,
    source: String,
    date: String,
    ports: Vec<String>,
    cpus: usize,
    mirror: Option<PathBuf>,
    methods: Vec<String>,
    tasks: Vec<String>,
) -> anyhow::Result<()> {
    let source: DatasetSource = source.parse()?;
    let date = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .context("date must be YYYY-MM-DD")?;
    let tasks = tasks
        .iter()
        .map(|t| t.parse::<PipelineTask>())
        .collect::<Result<Vec<_>, _>>()?;

    let registry = VerifierRegistry::with_defaults();
    let selected = if methods.is_empty() {
        registry.all().to_vec()
    } else {
        methods
            .iter()
            .map(|name| {
                registry
                    .get(name)
                    .with_context(|| format!("verification method <{name}> is not available"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let mut manager = DatasetManager::new(&repository, source, date, &ports, cpus)
        .with_methods(selected);
    if let Some(mirror) = mirror {
        manager = manager.with_collector(Box::new(LocalMirrorCollector::new(&mirror)));
    }

    let store = Arc::new(CertFileStore::open_with_cores(&store_path, cpus.max(1))?);
    manager.run(&tasks, &store)?;
    println!("Pipeline finished: {} task(s)", tasks.len());
    Ok(())
}
