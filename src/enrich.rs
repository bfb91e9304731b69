//! Best-effort, non-authoritative enrichment attached after linking:
//! verification URL, external QR image URL, and a locally saved QR image.
//!
//! Nothing here can fail a build.  Per-record failures become
//! [`EnrichmentWarning`]s (also logged at `warn`) and the record simply goes
//! without the affected field.  None of these fields feed the link hash.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chain::CertificateRecord;

pub const DEFAULT_QR_SERVICE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";
pub const DEFAULT_QR_SIZE: u32 = 180;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http: {0}")]
    Http(String),

    #[error("qr service returned status {status}")]
    Status { status: u16 },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for EnrichmentError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// QR fetcher boundary
// ---------------------------------------------------------------------------

/// Source of rendered QR images.
///
/// Production: [`HttpQrFetcher`] against an image-generation service.
/// Tests substitute an in-process implementation.
pub trait QrFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, EnrichmentError>;
}

/// Blocking HTTP fetcher with bounded connect and request timeouts.
#[derive(Debug)]
pub struct HttpQrFetcher {
    client: reqwest::blocking::Client,
}

impl HttpQrFetcher {
    pub fn new(timeout: Duration) -> Result<Self, EnrichmentError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("certchain/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl QrFetcher for HttpQrFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, EnrichmentError> {
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes()?.to_vec())
    }
}

/// Stand-in used when the HTTP client cannot be constructed; every fetch
/// fails with the construction error so records degrade to "no QR".
#[derive(Debug)]
pub struct UnavailableFetcher {
    pub reason: String,
}

impl QrFetcher for UnavailableFetcher {
    fn fetch(&self, _url: &str) -> Result<Vec<u8>, EnrichmentError> {
        Err(EnrichmentError::Http(self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// URL derivation
// ---------------------------------------------------------------------------

/// `<base>/?hash=<hash>`, with any trailing slashes on `base` collapsed.
pub fn verification_url(base_url: &str, hash: &str) -> String {
    format!("{}/?hash={hash}", base_url.trim_end_matches('/'))
}

/// Image-service request encoding `data` at `size`x`size` pixels.
pub fn qr_code_url(service_url: &str, data: &str, size: u32) -> Result<String, EnrichmentError> {
    let size = format!("{size}x{size}");
    reqwest::Url::parse_with_params(service_url, &[("data", data), ("size", size.as_str())])
        .map(String::from)
        .map_err(|e| EnrichmentError::InvalidUrl(format!("{service_url}: {e}")))
}

/// `<cert_id>.png`, or the zero-padded 1-based position when the id is blank.
pub fn qr_file_name(cert_id: &str, position: usize) -> String {
    if cert_id.is_empty() {
        format!("{:03}.png", position + 1)
    } else {
        format!("{cert_id}.png")
    }
}

/// True when `cert_id` can be used as a file stem inside the QR directory.
fn is_safe_file_stem(cert_id: &str) -> bool {
    !cert_id.contains(&['/', '\\', ':', '\0'][..]) && !cert_id.contains("..")
}

/// Assign every record a distinct QR file name inside the QR directory.
///
/// Ids that are not plain file stems, and names already taken by an earlier
/// record, fall back to the position name and produce a warning.
fn plan_qr_names(records: &[CertificateRecord]) -> (Vec<String>, Vec<EnrichmentWarning>) {
    let mut used = HashSet::with_capacity(records.len());
    let mut names = Vec::with_capacity(records.len());
    let mut warnings = Vec::new();

    for (position, record) in records.iter().enumerate() {
        let preferred = qr_file_name(&record.cert_id, position);
        let problem = if !is_safe_file_stem(&record.cert_id) {
            Some("CertID is not a plain file name")
        } else if used.contains(&preferred) {
            Some("QR file name already used by an earlier record")
        } else {
            None
        };

        let name = match problem {
            None => preferred,
            Some(why) => {
                let fallback = qr_file_name("", position);
                let name = if used.contains(&fallback) {
                    format!("{:03}-{}.png", position + 1, record.current_hash)
                } else {
                    fallback
                };
                warnings.push(warning(position, record, &format!("{why}; QR saved as {name}")));
                name
            }
        };
        used.insert(name.clone());
        names.push(name);
    }
    (names, warnings)
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentOptions {
    pub base_url: String,
    pub add_qr_url: bool,
    pub qr_dir: Option<PathBuf>,
    pub qr_size: u32,
    pub qr_absolute: bool,
    pub qr_service_url: String,
    pub workers: usize,
}

impl EnrichmentOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            add_qr_url: false,
            qr_dir: None,
            qr_size: DEFAULT_QR_SIZE,
            qr_absolute: false,
            qr_service_url: DEFAULT_QR_SERVICE_URL.to_string(),
            workers: 1,
        }
    }
}

/// Fields attached to one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub verification_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub qr_code_path: Option<String>,
}

/// Side-channel record of a degraded enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentWarning {
    pub position: usize,
    pub cert_id: String,
    pub message: String,
}

pub struct Enricher<'f> {
    options: EnrichmentOptions,
    fetcher: &'f dyn QrFetcher,
}

impl std::fmt::Debug for Enricher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'f> Enricher<'f> {
    pub fn new(options: EnrichmentOptions, fetcher: &'f dyn QrFetcher) -> Self {
        Self { options, fetcher }
    }

    /// Enrich every record, returning results in chain order.
    ///
    /// Records are split across up to `workers` scoped threads; each record
    /// is independent and the chain itself is only read.
    pub fn enrich(&self, records: &[CertificateRecord]) -> (Vec<Enrichment>, Vec<EnrichmentWarning>) {
        let workers = self.options.workers.clamp(1, records.len().max(1));
        let chunk = records.len().div_ceil(workers).max(1);

        let (names, mut warnings) = if self.options.qr_dir.is_some() {
            plan_qr_names(records)
        } else {
            (Vec::new(), Vec::new())
        };
        let names = &names;

        let per_chunk: Vec<Vec<(Enrichment, Option<EnrichmentWarning>)>> = std::thread::scope(|s| {
            let handles: Vec<_> = records
                .chunks(chunk)
                .enumerate()
                .map(|(c, slice)| {
                    let offset = c * chunk;
                    let handle = s.spawn(move || {
                        slice
                            .iter()
                            .enumerate()
                            .map(|(i, r)| {
                                let name = names.get(offset + i).map(String::as_str);
                                self.enrich_one(offset + i, r, name)
                            })
                            .collect::<Vec<_>>()
                    });
                    (offset, slice, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(offset, slice, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        slice
                            .iter()
                            .enumerate()
                            .map(|(i, r)| {
                                let e = Enrichment {
                                    verification_url: Some(verification_url(
                                        &self.options.base_url,
                                        &r.current_hash,
                                    )),
                                    ..Enrichment::default()
                                };
                                (e, Some(warning(offset + i, r, "enrichment worker panicked")))
                            })
                            .collect()
                    })
                })
                .collect()
        });

        let mut enrichments = Vec::with_capacity(records.len());
        for (e, w) in per_chunk.into_iter().flatten() {
            enrichments.push(e);
            warnings.extend(w);
        }
        warnings.sort_by_key(|w| w.position);
        (enrichments, warnings)
    }

    fn enrich_one(
        &self,
        position: usize,
        record: &CertificateRecord,
        qr_name: Option<&str>,
    ) -> (Enrichment, Option<EnrichmentWarning>) {
        let opts = &self.options;
        let url = verification_url(&opts.base_url, &record.current_hash);
        let mut out = Enrichment {
            verification_url: Some(url.clone()),
            ..Enrichment::default()
        };

        if !opts.add_qr_url && opts.qr_dir.is_none() {
            return (out, None);
        }

        let qr_url = match qr_code_url(&opts.qr_service_url, &url, opts.qr_size) {
            Ok(u) => u,
            Err(e) => return (out, Some(warning(position, record, &e.to_string()))),
        };
        if opts.add_qr_url {
            out.qr_code_url = Some(qr_url.clone());
        }

        if let (Some(dir), Some(name)) = (&opts.qr_dir, qr_name) {
            let path = dir.join(name);
            match self.save_qr(&qr_url, &path) {
                Ok(stored) => out.qr_code_path = Some(stored),
                Err(e) => return (out, Some(warning(position, record, &e.to_string()))),
            }
        }
        (out, None)
    }

    fn save_qr(&self, qr_url: &str, path: &Path) -> Result<String, EnrichmentError> {
        let bytes = self.fetcher.fetch(qr_url)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "qr saved");
        let stored = if self.options.qr_absolute {
            std::path::absolute(path)?
        } else {
            path.to_path_buf()
        };
        Ok(stored.display().to_string())
    }
}

fn warning(position: usize, record: &CertificateRecord, message: &str) -> EnrichmentWarning {
    let label = if record.cert_id.is_empty() {
        (position + 1).to_string()
    } else {
        record.cert_id.clone()
    };
    warn!(cert = %label, position, error = %message, "enrichment failed; continuing without it");
    EnrichmentWarning {
        position,
        cert_id: record.cert_id.clone(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
