//! Chain verification: re-derive every link hash from an anchor and compare.
//!
//! A mismatch at position `i` marks `i` and everything after it as untrusted,
//! since every later hash depends on the broken one.

use std::collections::HashSet;

use serde::Serialize;

use crate::chain::{CertificateRecord, GENESIS_HASH};
use crate::error::{CertChainError, Result};
use crate::index::HashIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    /// First untrustworthy position (zero-based).
    Broken { at_index: usize },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Valid => Ok(()),
            Verdict::Broken { at_index } => Err(CertChainError::BrokenChain { index: at_index }),
        }
    }
}

/// Answer to "is this hash an authentic certificate?".
#[derive(Debug, Clone, Serialize)]
pub struct Verification<'a> {
    pub position: usize,
    pub record: &'a CertificateRecord,
    pub verdict: Verdict,
}

/// True when `record` hashes correctly on top of `claimed_previous`.
pub fn verify_record(record: &CertificateRecord, claimed_previous: &str) -> bool {
    record.previous_hash == claimed_previous && record.recompute_hash() == record.current_hash
}

/// Verify the whole chain from `anchor` (or [`GENESIS_HASH`]).
///
/// An empty sequence is reported as broken at position 0.
pub fn verify_chain(records: &[CertificateRecord], anchor: Option<&str>) -> Verdict {
    if records.is_empty() {
        return Verdict::Broken { at_index: 0 };
    }
    verify_through(records, anchor, records.len() - 1)
}

/// Verify positions `0..=through` from `anchor` (or [`GENESIS_HASH`]).
pub fn verify_through(records: &[CertificateRecord], anchor: Option<&str>, through: usize) -> Verdict {
    let mut expected_previous = anchor
        .map(|a| a.trim().to_ascii_lowercase())
        .unwrap_or_else(|| GENESIS_HASH.to_string());
    let mut seen = HashSet::new();

    for (i, record) in records.iter().enumerate().take(through.saturating_add(1)) {
        if record.previous_hash != expected_previous {
            return Verdict::Broken { at_index: i };
        }
        let recomputed = record.recompute_hash();
        if recomputed != record.current_hash || !seen.insert(recomputed.clone()) {
            return Verdict::Broken { at_index: i };
        }
        expected_previous = recomputed;
    }
    if through >= records.len() {
        return Verdict::Broken {
            at_index: records.len(),
        };
    }
    Verdict::Valid
}

/// Look `hash` up and verify the chain from `anchor` through its position.
///
/// Returns `None` (not found) for unknown hashes and for stale index entries
/// that point at a record carrying a different hash.
pub fn verify_hash<'a>(
    records: &'a [CertificateRecord],
    index: &HashIndex,
    hash: &str,
    anchor: Option<&str>,
) -> Option<Verification<'a>> {
    let position = index.lookup(hash)?;
    let record = records.get(position)?;
    if record.current_hash != hash.trim().to_ascii_lowercase() {
        return None;
    }
    Some(Verification {
        position,
        record,
        verdict: verify_through(records, anchor, position),
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::normalize::NormalizedRecord;

    fn records(n: usize, start: Option<&str>) -> Vec<CertificateRecord> {
        let input: Vec<_> = (0..n)
            .map(|i| NormalizedRecord {
                cert_id: format!("ID-{i}"),
                recipient_name: format!("Recipient {i}"),
                course_title: "Ledgers 101".into(),
                date_issued: "2024-06-30".into(),
            })
            .collect();
        Chain::link(&input, start).unwrap().into_records()
    }

    #[test]
    fn fresh_chain_is_valid() {
        assert_eq!(verify_chain(&records(6, None), None), Verdict::Valid);
    }

    #[test]
    fn empty_chain_is_broken() {
        assert_eq!(verify_chain(&[], None), Verdict::Broken { at_index: 0 });
    }

    #[test]
    fn each_hashed_field_is_tamper_evident() {
        let mutations: [fn(&mut CertificateRecord); 5] = [
            |r| r.cert_id.push('X'),
            |r| r.recipient_name = "Eve".into(),
            |r| r.course_title.clear(),
            |r| r.date_issued = "2024-07-01".into(),
            |r| r.previous_hash = "1".repeat(64),
        ];
        for mutate in mutations {
            let mut rs = records(5, None);
            mutate(&mut rs[2]);
            assert_eq!(verify_chain(&rs, None), Verdict::Broken { at_index: 2 });
            for later in 2..5 {
                assert_eq!(
                    verify_through(&rs, None, later),
                    Verdict::Broken { at_index: 2 }
                );
            }
            assert_eq!(verify_through(&rs, None, 1), Verdict::Valid);
        }
    }

    #[test]
    fn rewritten_current_hash_breaks_successor() {
        let mut rs = records(3, None);
        rs[1].recipient_name = "Eve".into();
        rs[1].current_hash = rs[1].recompute_hash();
        assert_eq!(verify_chain(&rs, None), Verdict::Broken { at_index: 2 });
    }

    #[test]
    fn wrong_anchor_breaks_at_zero() {
        let start = "a".repeat(64);
        let rs = records(2, Some(&start));
        assert_eq!(verify_chain(&rs, None), Verdict::Broken { at_index: 0 });
        assert_eq!(verify_chain(&rs, Some(&start)), Verdict::Valid);
    }

    #[test]
    fn reordering_is_detected() {
        let mut rs = records(4, None);
        rs.swap(1, 2);
        assert_eq!(verify_chain(&rs, None), Verdict::Broken { at_index: 1 });
    }

    #[test]
    fn verify_through_past_end_is_broken() {
        let rs = records(2, None);
        assert_eq!(verify_through(&rs, None, 5), Verdict::Broken { at_index: 2 });
    }

    #[test]
    fn single_record_check() {
        let rs = records(2, None);
        assert!(verify_record(&rs[1], &rs[0].current_hash));
        assert!(!verify_record(&rs[1], GENESIS_HASH));
    }

    #[test]
    fn verify_hash_reports_position_and_verdict() {
        let rs = records(4, None);
        let idx = HashIndex::from_records(&rs);
        let v = verify_hash(&rs, &idx, &rs[3].current_hash, None).unwrap();
        assert_eq!(v.position, 3);
        assert_eq!(v.record.cert_id, "ID-3");
        assert!(v.verdict.is_valid());
        assert!(verify_hash(&rs, &idx, &"e".repeat(64), None).is_none());
    }

    #[test]
    fn verify_hash_flags_tamper_upstream() {
        let mut rs = records(4, None);
        let idx = HashIndex::from_records(&rs);
        rs[1].course_title = "Forged".into();
        let v = verify_hash(&rs, &idx, &rs[3].current_hash.clone(), None).unwrap();
        assert_eq!(v.verdict, Verdict::Broken { at_index: 1 });
        let v0 = verify_hash(&rs, &idx, &rs[0].current_hash.clone(), None).unwrap();
        assert!(v0.verdict.is_valid());
    }

    #[test]
    fn broken_verdict_converts_to_error() {
        let e = Verdict::Broken { at_index: 7 }.into_result().unwrap_err();
        assert_eq!(e.to_string(), "chain broken at position 7");
    }
}
