//! mbed TLS cert_app client

use crate::{Verifier, VerifyContext, UNKNOWN};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

/// Drives `mbedtls_cert_app mode=file` over a temporary file holding the
/// concatenated chain. Historical evaluation needs a faketime preload
/// library, same as the GnuTLS client.
#[derive(Debug)]
pub struct MbedTls {
    pub trust_store: PathBuf,
    pub faketime_lib: Option<PathBuf>,
}

impl Default for MbedTls {
    fn default() -> Self {
        MbedTls { trust_store: PathBuf::from("/etc/pki/tls/cert.pem"), faketime_lib: None }
    }
}

impl MbedTls {
    pub const TOOL: &'static str = "mbedtls_cert_app";

    fn run(&self, chain: &[PathBuf], ctx: &VerifyContext) -> std::io::Result<String> {
        let mut chain_file = tempfile::NamedTempFile::new()?;
        for path in chain {
            chain_file.write_all(&std::fs::read(path)?)?;
        }
        chain_file.flush()?;

        let mut command = Command::new(Self::TOOL);
        command
            .arg("mode=file")
            .arg(format!("filename={}", chain_file.path().display()))
            .arg(format!("ca_file={}", self.trust_store.display()));
        if let Some(reference_time) = ctx.reference_time {
            match &self.faketime_lib {
                Some(lib) => {
                    command.env("LD_PRELOAD", lib).env("FAKETIME", faketime_stamp(reference_time));
                }
                None => {
                    tracing::debug!("mbedtls has no faketime library, reference time ignored")
                }
            }
        }
        let output = command.output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn faketime_stamp(reference_time: i64) -> String {
    chrono::DateTime::from_timestamp(reference_time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "1970-01-01 00:00:00".to_string())
}

impl Verifier for MbedTls {
    fn name(&self) -> &str {
        "mbedtls"
    }

    fn verify(&self, chain: &[PathBuf], ctx: &VerifyContext) -> String {
        if chain.is_empty() {
            return "Error".to_string();
        }
        let output = match self.run(chain, ctx) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("mbedtls_cert_app invocation failed: {err}");
                return "Error".to_string();
            }
        };
        parse_output(&output)
    }
}

/// The tool prints `ok` on success; failures end with `! <reason>` lines
/// after a `failed` marker.
fn parse_output(output: &str) -> String {
    let lines: Vec<&str> = output.trim().lines().map(str::trim).collect();
    match lines.last() {
        Some(&"ok") => "Verified".to_string(),
        Some(last) if last.starts_with('!') => {
            let mut reasons: Vec<String> = Vec::new();
            if let Some(failed_at) = lines.iter().position(|line| *line == "failed") {
                for line in &lines[failed_at + 1..] {
                    if let Some(message) = line.strip_prefix('!') {
                        reasons.push(camel_case(message));
                    }
                }
            }
            if reasons.is_empty() {
                UNKNOWN.to_string()
            } else {
                reasons.sort();
                reasons.dedup();
                reasons.join("+")
            }
        }
        _ => UNKNOWN.to_string(),
    }
}

fn camel_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
