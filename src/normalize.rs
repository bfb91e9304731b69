//! Field normalization for raw certificate rows.
//!
//! Pure functions only: trimming, canonical date parsing, and digest
//! format checks.  Nothing here touches the filesystem or the chain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{format_description::BorrowedFormatItem, macros::format_description, Date};

use crate::error::{CertChainError, Result};
use crate::util;

/// Column names shared by the input reader and the export writer.
pub mod columns {
    pub const CERT_ID: &str = "CertID";
    pub const RECIPIENT_NAME: &str = "RecipientName";
    pub const COURSE_TITLE: &str = "CourseTitle";
    pub const DATE_ISSUED: &str = "DateIssued";
    pub const PREVIOUS_HASH: &str = "PreviousHash";
    pub const CURRENT_HASH: &str = "CurrentHash";
    pub const VERIFICATION_URL: &str = "VerificationURL";
    pub const QR_CODE_URL: &str = "QRCodeURL";
    pub const QR_CODE_PATH: &str = "QRCodePath";

    /// Columns every input file must carry, in canonical order.
    pub const REQUIRED: [&str; 6] = [
        CERT_ID,
        RECIPIENT_NAME,
        COURSE_TITLE,
        DATE_ISSUED,
        PREVIOUS_HASH,
        CURRENT_HASH,
    ];
}

/// Accepted on input: month and day may omit their leading zero.
const DATE_INPUT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month padding:none]-[day padding:none]");

/// Canonical rendering stored in the chain and fed to the link hash.
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One input row as read: column name to raw cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(HashMap<String, String>);

impl RawRecord {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Cell text for `column`, or `""` when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.0.get(column).map(String::as_str).unwrap_or("")
    }
}

/// A row whose hashed fields are in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub cert_id: String,
    pub recipient_name: String,
    pub course_title: String,
    pub date_issued: String,
}

/// Normalized rows plus the first row's explicit `PreviousHash`, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedInput {
    pub records: Vec<NormalizedRecord>,
    pub previous_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Field rules
// ---------------------------------------------------------------------------

/// Parse `YYYY-M-D` (zero padding optional) after trimming and re-render it
/// canonically as `YYYY-MM-DD`.
pub fn normalize_date(raw: &str, row: usize) -> Result<String> {
    let s = raw.trim();
    let invalid = || CertChainError::InvalidDate {
        row,
        value: s.to_string(),
    };
    let date = Date::parse(s, DATE_INPUT_FORMAT).map_err(|_| invalid())?;
    date.format(DATE_FORMAT).map_err(|_| invalid())
}

/// Trim and lowercase a digest, requiring exactly 64 hex characters.
pub fn normalize_hash(raw: &str, row: usize) -> Result<String> {
    let s = raw.trim().to_ascii_lowercase();
    if !util::is_hex64(&s) {
        return Err(CertChainError::InvalidHashFormat { row, value: s });
    }
    Ok(s)
}

/// Normalize the hashed fields of one row.
///
/// `row` is the 1-based file row (header is row 1), used only for errors.
pub fn normalize_record(raw: &RawRecord, row: usize) -> Result<NormalizedRecord> {
    Ok(NormalizedRecord {
        cert_id: raw.get(columns::CERT_ID).trim().to_string(),
        recipient_name: raw.get(columns::RECIPIENT_NAME).trim().to_string(),
        course_title: raw.get(columns::COURSE_TITLE).trim().to_string(),
        date_issued: normalize_date(raw.get(columns::DATE_ISSUED), row)?,
    })
}

/// Normalize a whole input in order, failing on the first bad row.
///
/// Only the first row's `PreviousHash` is consulted; later cells are derived
/// during linking and ignored here, as are any `CurrentHash` cells.
pub fn normalize_rows(rows: &[RawRecord]) -> Result<NormalizedInput> {
    let mut records = Vec::with_capacity(rows.len());
    let mut previous_hash = None;
    for (i, raw) in rows.iter().enumerate() {
        let row = i + 2;
        if i == 0 {
            let supplied = raw.get(columns::PREVIOUS_HASH);
            if !supplied.trim().is_empty() {
                previous_hash = Some(normalize_hash(supplied, row)?);
            }
        }
        records.push(normalize_record(raw, row)?);
    }
    Ok(NormalizedInput {
        records,
        previous_hash,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
