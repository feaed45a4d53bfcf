//! Certvault Pipeline Module
//!
//! The staged ingest pipeline:
//! - Collector contract pulling raw scan dumps into a repository
//! - Unifier streaming raw dumps into the store and per-host chain files
//! - Analyser driving verifier back-ends over unified chains
//! - Manager ordering the stages and threading artifacts between them

pub mod analyser;
pub mod collector;
pub mod error;
pub mod manager;
pub mod unifier;

pub use analyser::{ChainValidator, ValidatorOptions};
pub use collector::{Collector, LocalMirrorCollector};
pub use error::{PipelineError, Result};
pub use manager::{DatasetFilter, DatasetManager, PipelineTask};
pub use unifier::{read_chains, UnifyLog, Unifier};
