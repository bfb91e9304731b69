use anyhow::Result;
use tempfile::tempdir;

use certchain_core::{
    chain::{CertificateRecord, Chain},
    config::CertChainConfig,
    enrich::{EnrichmentError, QrFetcher},
    export,
    index::HashIndex,
    input, normalize, pipeline,
    verify::{self, Verdict},
};

struct PngStub;

impl QrFetcher for PngStub {
    fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, EnrichmentError> {
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }
}

const INPUT: &str = "CertID,RecipientName,CourseTitle,DateIssued,PreviousHash,CurrentHash\n\
                     C1,Alice,Course A,2024-01-10,,\n\
                     C2,Bob,Course B,2024-02-01,,\n\
                     C3,Carol,Course C,2024-03-15,,\n\
                     C4,Dave,Course D,2024-04-20,,\n";

fn setup(dir: &std::path::Path) -> Result<CertChainConfig> {
    let mut cfg = CertChainConfig::default();
    cfg.paths.input = dir.join("data").join("Certificates.csv");
    cfg.paths.output_csv = dir.join("data").join("Certificates_Chained.csv");
    cfg.paths.output_json = Some(dir.join("web").join("data").join("certs.json"));
    cfg.paths.output_index = Some(dir.join("web").join("data").join("hash_index.json"));
    std::fs::create_dir_all(dir.join("data"))?;
    std::fs::write(&cfg.paths.input, INPUT)?;
    Ok(cfg)
}

#[test]
fn build_then_verify_exported_artifacts() -> Result<()> {
    let dir = tempdir()?;
    let mut cfg = setup(dir.path())?;
    cfg.enrichment.base_url = Some("https://certs.example.org".into());
    cfg.enrichment.add_qr_url = true;
    cfg.enrichment.qr_dir = Some(dir.path().join("web").join("data").join("qrcodes"));
    cfg.validate()?;

    let report = pipeline::build_and_export_with(&cfg, &PngStub)?;
    assert!(report.warnings.is_empty());
    assert_eq!(report.export.written.len(), 3);

    let records = export::read_chain_json(cfg.paths.output_json.as_ref().unwrap())?;
    assert_eq!(records.len(), 4);
    assert_eq!(verify::verify_chain(&records, None), Verdict::Valid);
    assert!(records.iter().all(|r| r.qr_code_path.is_some()));

    let idx = HashIndex::load(cfg.paths.output_index.as_ref().unwrap())?;
    assert_eq!(idx.len(), 4);
    let target = &records[2].current_hash;
    let v = verify::verify_hash(&records, &idx, target, None).expect("hash is indexed");
    assert_eq!(v.position, 2);
    assert_eq!(v.record.recipient_name, "Carol");
    assert!(v.verdict.is_valid());

    // The chained CSV is itself valid input and rebuilds to the same hashes.
    let rows = input::read_input(&cfg.paths.output_csv)?;
    let normalized = normalize::normalize_rows(&rows)?;
    let rebuilt = Chain::link(&normalized.records, normalized.previous_hash.as_deref())?;
    let rebuilt_hashes: Vec<_> = rebuilt.records().iter().map(|r| r.current_hash.as_str()).collect();
    let exported_hashes: Vec<_> = records.iter().map(|r| r.current_hash.as_str()).collect();
    assert_eq!(rebuilt_hashes, exported_hashes);
    let csv = std::fs::read_to_string(&cfg.paths.output_csv)?;
    assert!(csv
        .lines()
        .next()
        .unwrap()
        .ends_with("CurrentHash,VerificationURL,QRCodeURL,QRCodePath"));
    Ok(())
}

#[test]
fn blank_configured_genesis_verifies_from_zeros() -> Result<()> {
    let dir = tempdir()?;
    let mut cfg = setup(dir.path())?;
    pipeline::build_and_export_with(&cfg, &PngStub)?;
    let records = export::read_chain_json(cfg.paths.output_json.as_ref().unwrap())?;

    cfg.chain.genesis_hash = Some(String::new());
    let anchor = cfg.verification_anchor(None)?;
    assert_eq!(verify::verify_chain(&records, anchor.as_deref()), Verdict::Valid);
    Ok(())
}

#[test]
fn tampering_any_hashed_field_breaks_suffix() -> Result<()> {
    let dir = tempdir()?;
    let cfg = setup(dir.path())?;
    pipeline::build_and_export_with(&cfg, &PngStub)?;
    let json = cfg.paths.output_json.clone().unwrap();
    let pristine = export::read_chain_json(&json)?;

    let edits: [fn(&mut CertificateRecord); 5] = [
        |r| r.cert_id = "C9".into(),
        |r| r.recipient_name = "Mallory".into(),
        |r| r.course_title = "Course Z".into(),
        |r| r.date_issued = "2024-02-02".into(),
        |r| r.previous_hash = "f".repeat(64),
    ];
    for edit in edits {
        let mut records = pristine.clone();
        edit(&mut records[1]);
        std::fs::write(&json, serde_json::to_vec_pretty(&records)?)?;
        let persisted = export::read_chain_json(&json)?;

        assert_eq!(
            verify::verify_chain(&persisted, None),
            Verdict::Broken { at_index: 1 }
        );
        let idx = HashIndex::from_records(&pristine);
        for later in &pristine[1..] {
            let v = verify::verify_hash(&persisted, &idx, &later.current_hash, None).unwrap();
            assert!(!v.verdict.is_valid());
        }
        let v0 = verify::verify_hash(&persisted, &idx, &pristine[0].current_hash, None).unwrap();
        assert!(v0.verdict.is_valid());
    }
    Ok(())
}

#[test]
fn unknown_hash_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let cfg = setup(dir.path())?;
    let report = pipeline::build_and_export_with(&cfg, &PngStub)?;
    let idx = HashIndex::load(cfg.paths.output_index.as_ref().unwrap())?;
    assert!(verify::verify_hash(report.chain.records(), &idx, &"9".repeat(64), None).is_none());
    Ok(())
}

#[test]
fn add_certificate_then_rebuild_extends_ledger_order() -> Result<()> {
    let dir = tempdir()?;
    let cfg = setup(dir.path())?;
    let before = pipeline::build_and_export_with(&cfg, &PngStub)?;

    let cert = input::append_certificate(&cfg.paths.input, "Erin", "Course E", "2024-05-05")?;
    let after = pipeline::build_and_export_with(&cfg, &PngStub)?;

    assert_eq!(after.chain.len(), 5);
    assert_eq!(&after.chain.records()[..4], before.chain.records());
    let last = &after.chain.records()[4];
    assert_eq!(last.cert_id, cert.cert_id);
    assert_eq!(last.previous_hash, before.chain.last_hash());
    Ok(())
}

#[test]
fn extend_writes_combined_chain() -> Result<()> {
    let dir = tempdir()?;
    let cfg = setup(dir.path())?;
    pipeline::build_and_export_with(&cfg, &PngStub)?;
    let snapshot = dir.path().join("snapshot.json");
    std::fs::copy(cfg.paths.output_json.as_ref().unwrap(), &snapshot)?;

    std::fs::write(
        &cfg.paths.input,
        "CertID,RecipientName,CourseTitle,DateIssued,PreviousHash,CurrentHash\nC5,Frank,Course F,2024-06-01,,\n",
    )?;
    let report = pipeline::extend_and_export(&cfg, &snapshot, None)?;
    assert_eq!(report.chain.len(), 5);

    let records = export::read_chain_json(cfg.paths.output_json.as_ref().unwrap())?;
    assert_eq!(verify::verify_chain(&records, None), Verdict::Valid);
    assert_eq!(records[4].cert_id, "C5");
    Ok(())
}
