//! End-to-end build: input rows -> normalize -> link -> enrich -> export.
//!
//! Every fatal error surfaces before the first artifact is written.  The
//! chain is complete and fixed before enrichment starts, and enrichment
//! can only add warnings.

use std::path::Path;

use tracing::{info, warn};

use crate::chain::Chain;
use crate::config::CertChainConfig;
use crate::enrich::{Enricher, EnrichmentWarning, HttpQrFetcher, QrFetcher, UnavailableFetcher};
use crate::error::Result;
use crate::export::{self, ExportColumns, ExportReport};
use crate::input;
use crate::normalize;

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub chain: Chain,
    pub export: ExportReport,
    pub warnings: Vec<EnrichmentWarning>,
}

/// Read, normalize and link the configured input.  Writes nothing.
///
/// The first record's `previous_hash` is the configured override, else the
/// first row's `PreviousHash` cell, else the genesis hash.
pub fn build_chain(config: &CertChainConfig) -> Result<Chain> {
    let rows = input::read_input(&config.paths.input)?;
    let normalized = normalize::normalize_rows(&rows)?;
    let start = config
        .chain
        .genesis_hash
        .as_deref()
        .or(normalized.previous_hash.as_deref());
    Chain::link(&normalized.records, start)
}

/// Build from the configured input and write every configured artifact,
/// fetching QR images over HTTP when a QR directory is set.
pub fn build_and_export(config: &CertChainConfig) -> Result<BuildReport> {
    let chain = build_chain(config)?;
    with_default_fetcher(config, |fetcher| finish(config, chain, fetcher))
}

/// As [`build_and_export`], with a caller-supplied QR source.
pub fn build_and_export_with(config: &CertChainConfig, fetcher: &dyn QrFetcher) -> Result<BuildReport> {
    let chain = build_chain(config)?;
    finish(config, chain, fetcher)
}

/// Load the JSON chain at `existing`, verify it from `anchor`, append the
/// configured input as a new segment, and export the combined chain.
pub fn extend_and_export(
    config: &CertChainConfig,
    existing: &Path,
    anchor: Option<&str>,
) -> Result<BuildReport> {
    let chain = extend_chain(config, existing, anchor)?;
    with_default_fetcher(config, |fetcher| finish(config, chain, fetcher))
}

pub fn extend_chain(config: &CertChainConfig, existing: &Path, anchor: Option<&str>) -> Result<Chain> {
    let records = export::read_chain_json(existing)?;
    let base = Chain::from_verified(records, anchor)?;
    let rows = input::read_input(&config.paths.input)?;
    let normalized = normalize::normalize_rows(&rows)?;
    if normalized.previous_hash.as_deref().is_some_and(|h| h != base.last_hash()) {
        warn!(
            supplied = normalized.previous_hash.as_deref().unwrap_or_default(),
            last = base.last_hash(),
            "ignoring PreviousHash of first new row; extension links from the existing chain"
        );
    }
    base.extend(&normalized.records)
}

fn with_default_fetcher<T>(config: &CertChainConfig, f: impl FnOnce(&dyn QrFetcher) -> T) -> T {
    match HttpQrFetcher::new(config.fetch_timeout()) {
        Ok(http) => f(&http),
        Err(e) => {
            warn!(error = %e, "http client unavailable; QR downloads will be skipped");
            f(&UnavailableFetcher {
                reason: e.to_string(),
            })
        }
    }
}

fn finish(config: &CertChainConfig, mut chain: Chain, fetcher: &dyn QrFetcher) -> Result<BuildReport> {
    let options = config.enrichment_options();
    let cols = ExportColumns::for_enrichment(options.as_ref());

    let mut warnings = Vec::new();
    if let Some(options) = options {
        let (enrichments, w) = Enricher::new(options, fetcher).enrich(chain.records());
        chain.apply_enrichment(enrichments);
        warnings = w;
    }

    let export = export::export_chain(&chain, cols, &config.export_targets())?;
    info!(
        records = chain.len(),
        last_hash = chain.last_hash(),
        warnings = warnings.len(),
        "chain build complete"
    );
    Ok(BuildReport {
        chain,
        export,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::GENESIS_HASH;
    use crate::enrich::EnrichmentError;
    use tempfile::tempdir;

    struct NoNetwork;

    impl QrFetcher for NoNetwork {
        fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, EnrichmentError> {
            Err(EnrichmentError::Http("offline".into()))
        }
    }

    fn config_in(dir: &Path, input: &str) -> CertChainConfig {
        let mut cfg = CertChainConfig::default();
        cfg.paths.input = dir.join("Certificates.csv");
        cfg.paths.output_csv = dir.join("out").join("chained.csv");
        cfg.paths.output_json = Some(dir.join("out").join("certs.json"));
        cfg.paths.output_index = Some(dir.join("out").join("hash_index.json"));
        std::fs::write(&cfg.paths.input, input).unwrap();
        cfg
    }

    const INPUT: &str = "CertID,RecipientName,CourseTitle,DateIssued,PreviousHash,CurrentHash\n\
                         C1,Alice,Course A,2024-01-10,,\n\
                         C2,Bob,Course B,2024-02-01,,\n";

    #[test]
    fn first_row_previous_hash_used_when_no_override() {
        let dir = tempdir().unwrap();
        let prev = "1".repeat(64);
        let cfg = config_in(
            dir.path(),
            &format!(
                "CertID,RecipientName,CourseTitle,DateIssued,PreviousHash,CurrentHash\nC1,A,T,2024-01-10,{prev},\n"
            ),
        );
        assert_eq!(build_chain(&cfg).unwrap().anchor(), prev);
    }

    #[test]
    fn configured_override_beats_input_cell() {
        let dir = tempdir().unwrap();
        let mut cfg = config_in(
            dir.path(),
            &format!(
                "CertID,RecipientName,CourseTitle,DateIssued,PreviousHash,CurrentHash\nC1,A,T,2024-01-10,{},\n",
                "1".repeat(64)
            ),
        );
        cfg.chain.genesis_hash = Some("2".repeat(64));
        assert_eq!(build_chain(&cfg).unwrap().anchor(), "2".repeat(64));
    }

    #[test]
    fn enrichment_failures_do_not_fail_build() {
        let dir = tempdir().unwrap();
        let mut cfg = config_in(dir.path(), INPUT);
        cfg.enrichment.base_url = Some("https://certs.example.org/".into());
        cfg.enrichment.qr_dir = Some(dir.path().join("qr"));

        let report = build_and_export_with(&cfg, &NoNetwork).unwrap();
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.chain.anchor(), GENESIS_HASH);
        let first = &report.chain.records()[0];
        assert!(first.qr_code_path.is_none());
        assert_eq!(
            first.verification_url.as_deref(),
            Some(format!("https://certs.example.org/?hash={}", first.current_hash).as_str())
        );

        let csv = std::fs::read_to_string(&cfg.paths.output_csv).unwrap();
        assert!(csv.lines().next().unwrap().ends_with("VerificationURL,QRCodePath"));
    }

    #[test]
    fn extension_links_onto_existing_chain() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), INPUT);
        let first = build_and_export_with(&cfg, &NoNetwork).unwrap();

        let existing = dir.path().join("previous.json");
        std::fs::copy(cfg.paths.output_json.as_ref().unwrap(), &existing).unwrap();
        std::fs::write(
            &cfg.paths.input,
            "CertID,RecipientName,CourseTitle,DateIssued,PreviousHash,CurrentHash\nC3,Cy,Course C,2024-03-03,,\n",
        )
        .unwrap();

        let extended = extend_chain(&cfg, &existing, None).unwrap();
        assert_eq!(extended.len(), 3);
        assert_eq!(extended.records()[2].previous_hash, first.chain.last_hash());
    }

    #[test]
    fn extension_refuses_tampered_base() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), INPUT);
        build_and_export_with(&cfg, &NoNetwork).unwrap();

        let json_path = cfg.paths.output_json.clone().unwrap();
        let tampered = std::fs::read_to_string(&json_path).unwrap().replace("Alice", "Alicia");
        std::fs::write(&json_path, tampered).unwrap();

        let err = extend_chain(&cfg, &json_path, None).unwrap_err();
        assert!(matches!(err, crate::error::CertChainError::BrokenChain { index: 0 }));
    }
}
