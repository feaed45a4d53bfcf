//! PEM text helpers
//!
//! Certificates travel through the pipeline as opaque text. These helpers
//! only wrap/unwrap the PEM armor; they never parse the certificate body.

const PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";
const PEM_FOOTER: &str = "-----END CERTIFICATE-----";

/// Width of the BASE64 body lines inside a PEM block.
const PEM_LINE_WIDTH: usize = 64;

/// Convert a raw BASE64 encoded certificate body to PEM format.
///
/// The body is re-wrapped at 64 columns between the standard armor lines.
pub fn base64_to_pem(body: &str) -> String {
    let body = body.trim();
    let mut out = String::with_capacity(PEM_HEADER.len() + PEM_FOOTER.len() + body.len() + body.len() / PEM_LINE_WIDTH + 4);
    out.push_str(PEM_HEADER);
    out.push('\n');
    let bytes = body.as_bytes();
    for chunk in bytes.chunks(PEM_LINE_WIDTH) {
        // BASE64 input is ASCII, chunking on byte boundaries is safe
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(PEM_FOOTER);
    out
}

/// Simple check for the PEM certificate armor.
pub fn looks_like_pem(text: &str) -> bool {
    let text = text.trim_end_matches('\n');
    text.starts_with(PEM_HEADER) && text.ends_with(PEM_FOOTER)
}

/// File name under which a certificate is exported.
pub fn pem_filename(cert_id: &str) -> String {
    format!("{cert_id}.pem")
}
