//! Verifier registry
//!
//! Explicit name→verifier map populated at program start. Which back-ends
//! are compiled in is a build decision (cargo features); which of those are
//! registered is a runtime probe of the host system.

use crate::Verifier;
use std::path::Path;
use std::sync::Arc;

/// Verifier registry, preserving registration order.
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: Vec<Arc<dyn Verifier>>,
}

impl VerifierRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        VerifierRegistry { verifiers: Vec::new() }
    }

    /// Registry with every compiled-in client whose tool is present on the
    /// system.
    pub fn with_defaults() -> Self {
        let mut registry = VerifierRegistry::new();

        #[cfg(feature = "openssl")]
        if is_tool_available(crate::clients::openssl::Openssl::TOOL) {
            registry.register(Arc::new(crate::clients::openssl::Openssl::default()));
        }
        #[cfg(feature = "gnutls")]
        {
            let client = crate::clients::gnutls::GnuTls::default();
            if is_tool_available(crate::clients::gnutls::GnuTls::TOOL)
                && crate::clients::gnutls::is_setup_correctly(&client.trust_store)
            {
                registry.register(Arc::new(client));
            }
        }
        #[cfg(feature = "botan")]
        if is_tool_available(crate::clients::botan::Botan::TOOL) {
            registry.register(Arc::new(crate::clients::botan::Botan::default()));
        }
        #[cfg(feature = "mbedtls")]
        if is_tool_available(crate::clients::mbedtls::MbedTls::TOOL) {
            registry.register(Arc::new(crate::clients::mbedtls::MbedTls::default()));
        }

        registry
    }

    /// Register a verifier. A duplicate name is dropped with a warning.
    pub fn register(&mut self, verifier: Arc<dyn Verifier>) {
        if self.get(verifier.name()).is_some() {
            tracing::warn!("Verifier {} already registered, dropping", verifier.name());
            return;
        }
        tracing::info!("Registering verifier: {}", verifier.name());
        self.verifiers.push(verifier);
    }

    /// Look up a verifier by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Verifier>> {
        self.verifiers.iter().find(|v| v.name().eq_ignore_ascii_case(name)).cloned()
    }

    /// All registered verifiers, in registration order.
    pub fn all(&self) -> &[Arc<dyn Verifier>] {
        &self.verifiers
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.verifiers.iter().map(|v| v.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

/// Check whether an executable is reachable through `PATH`.
pub fn is_tool_available(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return true;
        }
    }
    false
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && std::fs::metadata(path).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
