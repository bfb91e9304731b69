//! Serialization of a finished chain to its three artifacts: the chained
//! CSV, the JSON record list, and the JSON hash index.
//!
//! Every artifact is rendered to memory first and then written to its own
//! path, so a failure on one target never touches the others.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::chain::{CertificateRecord, Chain};
use crate::enrich::EnrichmentOptions;
use crate::error::{CertChainError, ExportFailure, Result, ResultExt as _};
use crate::index::HashIndex;
use crate::normalize::columns;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Csv,
    Json,
    Index,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Artifact::Csv => "chained csv",
            Artifact::Json => "json export",
            Artifact::Index => "hash index",
        })
    }
}

/// Which optional columns the CSV carries.  Fixed by the enabled options,
/// not by which records actually got a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportColumns {
    pub verification_url: bool,
    pub qr_code_url: bool,
    pub qr_code_path: bool,
}

impl ExportColumns {
    pub fn for_enrichment(options: Option<&EnrichmentOptions>) -> Self {
        match options {
            None => Self::default(),
            Some(o) => Self {
                verification_url: true,
                qr_code_url: o.add_qr_url,
                qr_code_path: o.qr_dir.is_some(),
            },
        }
    }

    pub fn headers(&self) -> Vec<&'static str> {
        let mut h = columns::REQUIRED.to_vec();
        if self.verification_url {
            h.push(columns::VERIFICATION_URL);
        }
        if self.qr_code_url {
            h.push(columns::QR_CODE_URL);
        }
        if self.qr_code_path {
            h.push(columns::QR_CODE_PATH);
        }
        h
    }
}

/// Output locations.  The JSON export and the index are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTargets {
    pub csv: PathBuf,
    pub json: Option<PathBuf>,
    pub index: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub written: Vec<(Artifact, PathBuf)>,
    pub records: usize,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn render_csv(records: &[CertificateRecord], cols: ExportColumns) -> Result<Vec<u8>> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(cols.headers())?;
    for r in records {
        let mut row: Vec<&str> = vec![
            r.cert_id.as_str(),
            r.recipient_name.as_str(),
            r.course_title.as_str(),
            r.date_issued.as_str(),
            r.previous_hash.as_str(),
            r.current_hash.as_str(),
        ];
        if cols.verification_url {
            row.push(r.verification_url.as_deref().unwrap_or(""));
        }
        if cols.qr_code_url {
            row.push(r.qr_code_url.as_deref().unwrap_or(""));
        }
        if cols.qr_code_path {
            row.push(r.qr_code_path.as_deref().unwrap_or(""));
        }
        w.write_record(&row)?;
    }
    w.into_inner().map_err(|e| CertChainError::Io(e.into_error()))
}

pub fn render_json(records: &[CertificateRecord]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(records)?)
}

pub fn render_index(index: &HashIndex) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(index)?)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_artifact(artifact: Artifact, path: &Path, bytes: &[u8]) -> std::result::Result<(), ExportFailure> {
    let fail = |e: std::io::Error| ExportFailure {
        artifact,
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    util::ensure_parent_dir(path).map_err(fail)?;
    std::fs::write(path, bytes).map_err(fail)
}

/// Write all configured artifacts for `chain`.
///
/// Rendering happens before any file is opened.  Each write is attempted
/// even if an earlier one failed; all failures are returned together.
pub fn export_chain(chain: &Chain, cols: ExportColumns, targets: &ExportTargets) -> Result<ExportReport> {
    let records = chain.records();
    let mut planned: Vec<(Artifact, &Path, Vec<u8>)> =
        vec![(Artifact::Csv, targets.csv.as_path(), render_csv(records, cols)?)];
    if let Some(p) = &targets.json {
        planned.push((Artifact::Json, p.as_path(), render_json(records)?));
    }
    if let Some(p) = &targets.index {
        planned.push((Artifact::Index, p.as_path(), render_index(&chain.hash_index())?));
    }

    let mut written = Vec::new();
    let mut failures = Vec::new();
    for (artifact, path, bytes) in planned {
        match write_artifact(artifact, path, &bytes) {
            Ok(()) => {
                info!(%artifact, path = %path.display(), records = records.len(), "artifact written");
                written.push((artifact, path.to_path_buf()));
            }
            Err(f) => {
                warn!(%artifact, path = %path.display(), error = %f.message, "artifact write failed");
                failures.push(f);
            }
        }
    }

    if !failures.is_empty() {
        return Err(CertChainError::Export { failures });
    }
    Ok(ExportReport {
        written,
        records: records.len(),
    })
}

/// Read a JSON export back into records, preserving order.
pub fn read_chain_json(path: &Path) -> Result<Vec<CertificateRecord>> {
    let bytes = std::fs::read(path).ctx_input(&format!("read chain {}", path.display()))?;
    serde_json::from_slice(&bytes).ctx_input(&format!("parse chain {}", path.display()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
