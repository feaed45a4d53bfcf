//! OpenSSL command-line client

use crate::{Verifier, VerifyContext, OK};
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

/// Drives `openssl verify`. The reference time maps to `-attime`;
/// everything past the leaf is passed as `-untrusted` in reverse order.
#[derive(Debug, Default)]
pub struct Openssl;

impl Openssl {
    pub const TOOL: &'static str = "openssl";
}

fn error_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\nerror (\d+)").expect("openssl error regex"))
}

impl Verifier for Openssl {
    fn name(&self) -> &str {
        Self::TOOL
    }

    fn verify(&self, chain: &[PathBuf], ctx: &VerifyContext) -> String {
        let Some(leaf) = chain.first() else {
            return "-1".to_string();
        };
        let mut command = Command::new(Self::TOOL);
        command.arg("verify");
        if let Some(reference_time) = ctx.reference_time {
            command.args(["-attime", &reference_time.to_string()]);
        }
        for intermediate in chain[1..].iter().rev() {
            command.arg("-untrusted").arg(intermediate);
        }
        command.arg(leaf);

        match command.output() {
            Ok(output) if output.status.success() => OK.to_string(),
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                match error_code_regex().captures(&text) {
                    Some(caps) => caps[1].to_string(),
                    None => "-1".to_string(),
                }
            }
            Err(err) => {
                tracing::warn!("openssl invocation failed: {err}");
                "-1".to_string()
            }
        }
    }
}
