//! Certvault Verify Module
//!
//! Chain verification back-ends:
//! - `Verifier` contract: a named callable judging one chain at a
//!   historical reference time
//! - Registry with insertion order and case-insensitive lookup
//! - Feature-gated subprocess clients (openssl, gnutls, botan, mbedtls)
//!
//! A chain is a list of PEM file paths starting with the server leaf,
//! followed by intermediates and ending with the presumed CA.

pub mod clients;
pub mod registry;

pub use registry::{is_tool_available, VerifierRegistry};

use std::path::PathBuf;
use std::sync::Arc;

/// Result string of a successful verification.
pub const OK: &str = "0";
/// Result string when a back-end cannot classify its outcome.
pub const UNKNOWN: &str = "XX";

/// Context handed to every verification call.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyContext {
    /// Historical moment the chain is evaluated at, epoch seconds.
    pub reference_time: Option<i64>,
}

/// One verification back-end.
pub trait Verifier: Send + Sync {
    /// Registry name, matched case-insensitively.
    fn name(&self) -> &str;

    /// Judge a chain of PEM files. Returns a short opaque result string;
    /// back-ends never fail, they answer [`UNKNOWN`] instead.
    fn verify(&self, chain: &[PathBuf], ctx: &VerifyContext) -> String;
}

/// Closure-backed verifier, used for tests and ad-hoc methods.
pub struct FnVerifier {
    name: String,
    func: Box<dyn Fn(&[PathBuf], &VerifyContext) -> String + Send + Sync>,
}

impl FnVerifier {
    pub fn new<F>(name: &str, func: F) -> Arc<Self>
    where
        F: Fn(&[PathBuf], &VerifyContext) -> String + Send + Sync + 'static,
    {
        Arc::new(FnVerifier { name: name.to_string(), func: Box::new(func) })
    }
}

impl Verifier for FnVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn verify(&self, chain: &[PathBuf], ctx: &VerifyContext) -> String {
        (self.func)(chain, ctx)
    }
}
