//! Hashing helpers, path utilities, and shared validation.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CertChainError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Exactly 64 lowercase hex digits (a rendered SHA-256 digest).
static HEX64_RE: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// True when `s` is a lowercase 64-character hex digest.
pub fn is_hex64(s: &str) -> bool {
    HEX64_RE.is_match(s)
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(CertChainError::Validation(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(CertChainError::Validation(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Canonicalize a path if it exists, otherwise return it unchanged.
pub fn canonicalize_if_exists(p: &Path, label: &str) -> Result<PathBuf> {
    validate_path(p, label)?;
    if p.exists() {
        std::fs::canonicalize(p)
            .map_err(|e| CertChainError::Validation(format!("{label} path invalid: {e}")))
    } else {
        Ok(p.to_path_buf())
    }
}

/// Create the parent directory of `p` if it has one.  Idempotent.
pub fn ensure_parent_dir(p: &Path) -> std::io::Result<()> {
    match p.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("CERTCHAIN_GIT_HASH");
pub const BUILD_TS: &str = env!("CERTCHAIN_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("certchain v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
