//! Credential redaction for log output.
//!
//! Anything that might carry a credential (extractor argv, API keys) passes
//! through here before reaching a log field. The raw values never appear in
//! logs; keys are reduced to a short SHA-256 prefix.

use sha2::{Digest, Sha256};

/// Sentinel substituted for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Flags whose following argument carries a credential.
const SENSITIVE_FLAGS: &[&str] = &["--cookies", "--password", "--username"];

/// Redact an argument vector before logging.
///
/// The value after any sensitive flag is replaced with the sentinel, as is
/// any argument that looks like an authorization header.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut skip_next = false;

    for arg in args {
        if skip_next {
            redacted.push(REDACTED.to_string());
            skip_next = false;
        } else if SENSITIVE_FLAGS.contains(&arg.as_str()) {
            redacted.push(arg.clone());
            skip_next = true;
        } else if is_auth_header_like(arg) {
            redacted.push(REDACTED.to_string());
        } else {
            redacted.push(arg.clone());
        }
    }

    redacted
}

fn is_auth_header_like(arg: &str) -> bool {
    let lower = arg.to_ascii_lowercase();
    lower.starts_with("authorization:")
        || lower.starts_with("cookie:")
        || lower.starts_with("x-api-key:")
}

/// Hash an API key down to a loggable identity.
///
/// Returns the first 8 hex characters of the SHA-256 digest. The raw key is
/// never logged.
pub fn hash_api_key(api_key: &str) -> String {
    if api_key.is_empty() {
        return "empty".to_string();
    }
    let digest = Sha256::digest(api_key.as_bytes());
    hex_encode(&digest)[..8].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
