//! GnuTLS certtool client

use crate::{Verifier, VerifyContext, UNKNOWN};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const VERIFIED_MARK: &str = "Chain verification output: Verified. The certificate is trusted.";
const NOT_VERIFIED_MARK: &str =
    "Chain verification output: Not verified. The certificate is NOT trusted.";

/// Drives `certtool --verify`, feeding the concatenated PEM chain on
/// stdin. Historical evaluation needs a faketime preload library; without
/// one the reference time is ignored.
#[derive(Debug)]
pub struct GnuTls {
    pub trust_store: PathBuf,
    /// Path of `libfaketime.so.1`, enabling `reference_time` support.
    pub faketime_lib: Option<PathBuf>,
}

impl Default for GnuTls {
    fn default() -> Self {
        GnuTls {
            trust_store: PathBuf::from("/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem"),
            faketime_lib: None,
        }
    }
}

impl GnuTls {
    pub const TOOL: &'static str = "certtool";

    fn run(&self, chain: &[PathBuf], ctx: &VerifyContext) -> std::io::Result<String> {
        let mut pem = String::new();
        for path in chain {
            pem.push_str(&std::fs::read_to_string(path)?);
        }

        let mut command = Command::new(Self::TOOL);
        command
            .arg("--load-ca-certificate")
            .arg(&self.trust_store)
            .args(["--verify-profile", "low", "--verify"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(reference_time) = ctx.reference_time {
            match &self.faketime_lib {
                Some(lib) => {
                    command.env("LD_PRELOAD", lib).env("FAKETIME", faketime_stamp(reference_time));
                }
                None => {
                    tracing::debug!("certtool has no faketime library, reference time ignored")
                }
            }
        }

        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(pem.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

fn faketime_stamp(reference_time: i64) -> String {
    chrono::DateTime::from_timestamp(reference_time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "1970-01-01 00:00:00".to_string())
}

impl Verifier for GnuTls {
    fn name(&self) -> &str {
        "gnutls"
    }

    fn verify(&self, chain: &[PathBuf], ctx: &VerifyContext) -> String {
        if chain.is_empty() {
            return "Error".to_string();
        }
        let output = match self.run(chain, ctx) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("certtool invocation failed: {err}");
                return "Error".to_string();
            }
        };
        if output.contains(VERIFIED_MARK) {
            return "Verified".to_string();
        }
        match output.find(NOT_VERIFIED_MARK) {
            Some(index) => {
                let reason = reason_code(&output[index + NOT_VERIFIED_MARK.len()..]);
                if reason.is_empty() {
                    UNKNOWN.to_string()
                } else {
                    reason
                }
            }
            None => "Error".to_string(),
        }
    }
}

/// Compress the first sentence of the failure explanation into a CamelCase
/// token, e.g. `The certificate chain uses expired certificate.` becomes
/// `TheCertificateChainUsesExpiredCertificate`.
fn reason_code(explanation: &str) -> String {
    let first = explanation.trim().split('.').next().unwrap_or("");
    first.split_whitespace().map(capitalize).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Trust store presence is part of the client being usable at all.
pub fn is_setup_correctly(trust_store: &Path) -> bool {
    trust_store.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_camel_cased() {
        assert_eq!(
            reason_code(" The certificate chain uses expired certificate. More text."),
            "TheCertificateChainUsesExpiredCertificate"
        );
        assert_eq!(reason_code("   "), "");
    }
}
