//! Append-only certificate hash chain and the linker that builds it.
//!
//! Each record's `current_hash` is the SHA-256 of
//! `cert_id|recipient_name|course_title|date_issued|previous_hash`, and each
//! record's `previous_hash` is its predecessor's `current_hash`.  A [`Chain`]
//! can only be obtained by linking (or by verifying a persisted sequence),
//! so a value of this type always satisfies the linkage invariants.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::enrich::Enrichment;
use crate::error::{CertChainError, Result};
use crate::index::HashIndex;
use crate::normalize::NormalizedRecord;
use crate::util;
use crate::verify::{self, Verdict};

/// `previous_hash` of the first record of a fresh chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One linked certificate.  Hashed fields are immutable once linked; only the
/// enrichment fields may be attached afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(rename = "CertID")]
    pub cert_id: String,
    #[serde(rename = "RecipientName")]
    pub recipient_name: String,
    #[serde(rename = "CourseTitle")]
    pub course_title: String,
    #[serde(rename = "DateIssued")]
    pub date_issued: String,
    #[serde(rename = "PreviousHash")]
    pub previous_hash: String,
    #[serde(rename = "CurrentHash")]
    pub current_hash: String,

    #[serde(rename = "VerificationURL", default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    #[serde(rename = "QRCodeURL", default, skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
    #[serde(rename = "QRCodePath", default, skip_serializing_if = "Option::is_none")]
    pub qr_code_path: Option<String>,
}

impl CertificateRecord {
    /// Recompute this record's link hash from its stored fields.
    pub fn recompute_hash(&self) -> String {
        compute_link_hash(
            &self.cert_id,
            &self.recipient_name,
            &self.course_title,
            &self.date_issued,
            &self.previous_hash,
        )
    }
}

// ---------------------------------------------------------------------------
// Link hash
// ---------------------------------------------------------------------------

/// Digest applied to the pipe-delimited preimage.
///
/// The production digest is [`Sha256Digest`]; the seam exists so the linker's
/// duplicate guard can be exercised without a real SHA-256 collision.
pub trait LinkDigest {
    fn digest_hex(&self, preimage: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl LinkDigest for Sha256Digest {
    fn digest_hex(&self, preimage: &str) -> String {
        util::sha256_hex(preimage.as_bytes())
    }
}

pub fn link_preimage(
    cert_id: &str,
    recipient_name: &str,
    course_title: &str,
    date_issued: &str,
    previous_hash: &str,
) -> String {
    format!("{cert_id}|{recipient_name}|{course_title}|{date_issued}|{previous_hash}")
}

pub fn compute_link_hash(
    cert_id: &str,
    recipient_name: &str,
    course_title: &str,
    date_issued: &str,
    previous_hash: &str,
) -> String {
    Sha256Digest.digest_hex(&link_preimage(
        cert_id,
        recipient_name,
        course_title,
        date_issued,
        previous_hash,
    ))
}

// ---------------------------------------------------------------------------
// Linker
// ---------------------------------------------------------------------------

/// Single-pass linker state.  Scoped to one build call and then dropped, so
/// an aborted build leaves nothing behind.
struct Linker<'d, D: LinkDigest> {
    digest: &'d D,
    previous: String,
    seen: HashSet<String>,
    records: Vec<CertificateRecord>,
}

impl<'d, D: LinkDigest> Linker<'d, D> {
    fn new(digest: &'d D, start: &str, seen: HashSet<String>, capacity: usize) -> Self {
        Self {
            digest,
            previous: start.trim().to_ascii_lowercase(),
            seen,
            records: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, record: &NormalizedRecord, row: usize) -> Result<()> {
        if !util::is_hex64(&self.previous) {
            return Err(CertChainError::InvalidHashFormat {
                row,
                value: self.previous.clone(),
            });
        }

        let preimage = link_preimage(
            &record.cert_id,
            &record.recipient_name,
            &record.course_title,
            &record.date_issued,
            &self.previous,
        );
        let current_hash = self.digest.digest_hex(&preimage);

        if !self.seen.insert(current_hash.clone()) {
            return Err(CertChainError::DuplicateHash {
                row,
                hash: current_hash,
            });
        }
        debug!(row, cert_id = %record.cert_id, hash = %current_hash, "linked record");

        let previous_hash = std::mem::replace(&mut self.previous, current_hash.clone());
        self.records.push(CertificateRecord {
            cert_id: record.cert_id.clone(),
            recipient_name: record.recipient_name.clone(),
            course_title: record.course_title.clone(),
            date_issued: record.date_issued.clone(),
            previous_hash,
            current_hash,
            verification_url: None,
            qr_code_url: None,
            qr_code_path: None,
        });
        Ok(())
    }

    fn link_all(mut self, records: &[NormalizedRecord]) -> Result<Vec<CertificateRecord>> {
        if records.is_empty() {
            return Err(CertChainError::EmptyInput);
        }
        for (i, record) in records.iter().enumerate() {
            self.push(record, i + 2)?;
        }
        Ok(self.records)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// A non-empty, fully linked, strictly ordered sequence of certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    records: Vec<CertificateRecord>,
}

impl Chain {
    /// Link `records` in order, starting from `start` or [`GENESIS_HASH`].
    ///
    /// All-or-nothing: the first invalid or duplicate row aborts the build.
    pub fn link(records: &[NormalizedRecord], start: Option<&str>) -> Result<Self> {
        Self::link_with(&Sha256Digest, records, start)
    }

    pub fn link_with<D: LinkDigest>(
        digest: &D,
        records: &[NormalizedRecord],
        start: Option<&str>,
    ) -> Result<Self> {
        let start = start.unwrap_or(GENESIS_HASH);
        let linked = Linker::new(digest, start, HashSet::new(), records.len()).link_all(records)?;
        info!(records = linked.len(), "chain linked");
        Ok(Self { records: linked })
    }

    /// Append a new segment linked from this chain's final hash.
    ///
    /// The segment's hashes must also be distinct from every existing hash.
    /// Row numbers in errors refer to the new segment's input.
    pub fn extend(&self, records: &[NormalizedRecord]) -> Result<Self> {
        let seen: HashSet<String> = self.records.iter().map(|r| r.current_hash.clone()).collect();
        let segment = Linker::new(&Sha256Digest, self.last_hash(), seen, records.len())
            .link_all(records)?;
        info!(
            existing = self.records.len(),
            appended = segment.len(),
            "chain extended"
        );
        let mut all = self.records.clone();
        all.extend(segment);
        Ok(Self { records: all })
    }

    /// Adopt a persisted record sequence after verifying it from `anchor`.
    pub fn from_verified(records: Vec<CertificateRecord>, anchor: Option<&str>) -> Result<Self> {
        match verify::verify_chain(&records, anchor) {
            Verdict::Valid => Ok(Self { records }),
            Verdict::Broken { at_index } => Err(CertChainError::BrokenChain { index: at_index }),
        }
    }

    pub fn records(&self) -> &[CertificateRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CertificateRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `previous_hash` of the first record.
    pub fn anchor(&self) -> &str {
        &self.records[0].previous_hash
    }

    pub fn last_hash(&self) -> &str {
        &self.records[self.records.len() - 1].current_hash
    }

    pub fn hash_index(&self) -> HashIndex {
        HashIndex::from_records(&self.records)
    }

    /// Attach enrichment fields by position.  Hashed fields are untouched.
    pub fn apply_enrichment(&mut self, enrichments: Vec<Enrichment>) {
        for (record, e) in self.records.iter_mut().zip(enrichments) {
            record.verification_url = e.verification_url;
            record.qr_code_url = e.qr_code_url;
            record.qr_code_path = e.qr_code_path;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
