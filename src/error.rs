//! Structured error types for the certificate chain library.
//!
//! Every fallible chain operation returns [`Result<T>`] carrying a
//! [`CertChainError`].  Fatal build errors name the offending input row
//! (1-based, counting the header row) so an operator can fix the source
//! data directly.  Enrichment failures live in
//! [`crate::enrich::EnrichmentError`] and never convert into this type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the chain engine.
#[derive(Error, Debug)]
pub enum CertChainError {
    /// The input header lacks one or more required columns.
    #[error("input is missing required columns: {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("input has no data rows")]
    EmptyInput,

    #[error("row {row}: DateIssued must be ISO format YYYY-MM-DD, got '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("row {row}: invalid PreviousHash (must be 64 hex chars): '{value}'")]
    InvalidHashFormat { row: usize, value: String },

    #[error("row {row}: duplicate CurrentHash {hash}; input data must be unique")]
    DuplicateHash { row: usize, hash: String },

    /// Produced only when a caller turns a verification verdict into an error.
    #[error("chain broken at position {index}")]
    BrokenChain { index: usize },

    #[error("one or more artifacts failed to export: {}", render_failures(.failures))]
    Export { failures: Vec<ExportFailure> },

    #[error("input: {0}")]
    Input(String),

    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, CertChainError>;

/// One artifact that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFailure {
    pub artifact: crate::export::Artifact,
    pub path: PathBuf,
    pub message: String,
}

fn render_failures(failures: &[ExportFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.artifact, f.path.display(), f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that tags any foreign error with the subsystem it came from.
///
/// ```ignore
/// std::fs::read_to_string(path).ctx_input("read input csv")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_input(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_input(self, msg: &str) -> Result<T> {
        self.map_err(|e| CertChainError::Input(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| CertChainError::Config(format!("{msg}: {e}")))
    }
}
