//! Tabular certificate input: reading rows and appending new certificates.

use std::io::{Read, Write as _};
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::error::{CertChainError, Result, ResultExt as _};
use crate::normalize::{self, columns, RawRecord};

/// Check the header row for every required column before reading any data.
pub fn check_columns(headers: &csv::StringRecord) -> Result<()> {
    let missing: Vec<String> = columns::REQUIRED
        .iter()
        .filter(|c| !headers.iter().any(|h| h == **c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CertChainError::MissingColumns { missing })
    }
}

/// Read every data row of a CSV with a header row.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    check_columns(&headers)?;

    let mut rows = Vec::new();
    for rec in rdr.deserialize::<RawRecord>() {
        rows.push(rec?);
    }
    if rows.is_empty() {
        return Err(CertChainError::EmptyInput);
    }
    Ok(rows)
}

pub fn read_input(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path).ctx_input(&format!("open input {}", path.display()))?;
    let rows = read_rows(file)?;
    info!(path = %path.display(), rows = rows.len(), "input read");
    Ok(rows)
}

/// A certificate appended to the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCertificate {
    pub cert_id: String,
    pub recipient_name: String,
    pub course_title: String,
    pub date_issued: String,
}

/// Append one certificate with a fresh UUID v4 `CertID`.
///
/// A missing or empty file gets the full required header first.  An existing
/// file keeps its own column order; hash cells are left blank.
pub fn append_certificate(
    path: &Path,
    recipient_name: &str,
    course_title: &str,
    date_issued: &str,
) -> Result<NewCertificate> {
    let cert = NewCertificate {
        cert_id: Uuid::new_v4().to_string(),
        recipient_name: recipient_name.trim().to_string(),
        course_title: course_title.trim().to_string(),
        date_issued: normalize::normalize_date(date_issued, 2)?,
    };

    crate::util::ensure_parent_dir(path).ctx_input("create input dir")?;
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .ctx_input(&format!("open input {}", path.display()))?;

    let mut existing = String::new();
    file.read_to_string(&mut existing)
        .ctx_input(&format!("read input {}", path.display()))?;

    let header: Vec<String> = if existing.trim().is_empty() {
        let header: Vec<String> = columns::REQUIRED.iter().map(|c| c.to_string()).collect();
        let mut w = csv::Writer::from_writer(Vec::new());
        w.write_record(&header)?;
        file.write_all(&w.into_inner().ctx_input("flush header")?)?;
        header
    } else {
        let mut rdr = csv::Reader::from_reader(existing.as_bytes());
        let headers = rdr.headers()?.clone();
        check_columns(&headers)?;
        if !existing.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        headers.iter().map(str::to_string).collect()
    };

    let row: Vec<&str> = header
        .iter()
        .map(|h| match h.as_str() {
            columns::CERT_ID => cert.cert_id.as_str(),
            columns::RECIPIENT_NAME => cert.recipient_name.as_str(),
            columns::COURSE_TITLE => cert.course_title.as_str(),
            columns::DATE_ISSUED => cert.date_issued.as_str(),
            _ => "",
        })
        .collect();
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(&row)?;
    file.write_all(&w.into_inner().ctx_input("flush row")?)?;
    file.flush()?;

    info!(cert_id = %cert.cert_id, path = %path.display(), "certificate appended");
    Ok(cert)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
