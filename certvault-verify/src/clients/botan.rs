//! Botan command-line client

use crate::{Verifier, VerifyContext, OK, UNKNOWN};
use std::path::PathBuf;
use std::process::Command;

/// Drives `botan cert_verify leaf [intermediates...]` against a trust
/// store directory. The botan CLI has no reference-time switch, so the
/// context time is ignored.
#[derive(Debug)]
pub struct Botan {
    pub trust_store_dir: PathBuf,
}

impl Default for Botan {
    fn default() -> Self {
        Botan { trust_store_dir: PathBuf::from("/etc/pki/ca-trust/extracted/pem/") }
    }
}

impl Botan {
    pub const TOOL: &'static str = "botan";
}

impl Verifier for Botan {
    fn name(&self) -> &str {
        Self::TOOL
    }

    fn verify(&self, chain: &[PathBuf], _ctx: &VerifyContext) -> String {
        if chain.is_empty() {
            return "-1".to_string();
        }
        let mut command = Command::new(Self::TOOL);
        command.arg("cert_verify").arg("--ca-dir").arg(&self.trust_store_dir);
        for path in chain {
            command.arg(path);
        }

        match command.output() {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                let text = text.trim();
                if output.status.success() && text.contains("Certificate passes validation checks") {
                    OK.to_string()
                } else if text.is_empty() {
                    UNKNOWN.to_string()
                } else {
                    // Last line carries the failure reason
                    text.lines().last().unwrap_or(UNKNOWN).trim().to_string()
                }
            }
            Err(err) => {
                tracing::warn!("botan invocation failed: {err}");
                "-1".to_string()
            }
        }
    }
}
