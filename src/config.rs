//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit `--config` path
//! 2. `certchain.toml` next to the executable
//! 3. `$HOME/.config/certchain/config.toml` (`%LOCALAPPDATA%\certchain\config.toml` on Windows)
//! 4. Built-in defaults
//!
//! Environment variables then override file values, and CLI arguments
//! override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::enrich::{EnrichmentOptions, DEFAULT_QR_SERVICE_URL, DEFAULT_QR_SIZE};
use crate::error::{CertChainError, Result, ResultExt as _};
use crate::export::ExportTargets;
use crate::normalize;

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CertChainConfig {
    pub paths: PathsConfig,
    pub chain: ChainConfig,
    pub enrichment: EnrichmentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input: PathBuf,
    pub output_csv: PathBuf,
    pub output_json: Option<PathBuf>,
    pub output_index: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Explicit `previous_hash` for the first record.  Takes precedence over
    /// a `PreviousHash` cell in the first input row.
    pub genesis_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Verification page base.  Enrichment is off when unset.
    pub base_url: Option<String>,
    pub qr_dir: Option<PathBuf>,
    pub qr_size: u32,
    pub add_qr_url: bool,
    pub qr_absolute: bool,
    pub qr_service_url: String,
    pub timeout_secs: u64,
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines log file.  Empty string means no file logging.
    pub json_log_file: String,
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/Certificates.csv"),
            output_csv: PathBuf::from("data/Certificates_Chained.csv"),
            output_json: Some(PathBuf::from("web/data/certs.json")),
            output_index: Some(PathBuf::from("web/data/hash_index.json")),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            qr_dir: None,
            qr_size: DEFAULT_QR_SIZE,
            add_qr_url: false,
            qr_absolute: false,
            qr_service_url: DEFAULT_QR_SERVICE_URL.to_string(),
            timeout_secs: 10,
            workers: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl CertChainConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: CertChainConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("certchain.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        #[cfg(windows)]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let candidate = PathBuf::from(local).join("certchain").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("certchain")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(input) = std::env::var("CERTCHAIN_INPUT") {
            self.paths.input = PathBuf::from(input);
        }
        if let Ok(base) = std::env::var("CERTCHAIN_BASE_URL") {
            self.enrichment.base_url = Some(base);
        }
        if let Ok(genesis) = std::env::var("CERTCHAIN_GENESIS_HASH") {
            self.chain.genesis_hash = Some(genesis);
        }
        if let Ok(level) = std::env::var("CERTCHAIN_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Check cross-field rules and canonicalize the genesis override.
    pub fn validate(&mut self) -> Result<()> {
        self.chain.genesis_hash =
            normalize_override(self.chain.genesis_hash.as_deref(), "chain.genesis_hash")?;

        let e = &self.enrichment;
        let has_base = e.base_url.as_deref().is_some_and(|b| !b.trim().is_empty());
        if !has_base && (e.qr_dir.is_some() || e.add_qr_url) {
            return Err(CertChainError::Config(
                "enrichment.qr_dir and enrichment.add_qr_url require enrichment.base_url".into(),
            ));
        }
        if !(1..=1000).contains(&e.qr_size) {
            return Err(CertChainError::Config(format!(
                "enrichment.qr_size {} out of range [1, 1000]",
                e.qr_size
            )));
        }
        if e.workers == 0 {
            return Err(CertChainError::Config("enrichment.workers must be at least 1".into()));
        }
        if e.timeout_secs == 0 {
            return Err(CertChainError::Config(
                "enrichment.timeout_secs must be at least 1".into(),
            ));
        }
        crate::util::validate_path(&self.paths.input, "input").ctx_config("paths.input")?;
        crate::util::validate_path(&self.paths.output_csv, "output csv")
            .ctx_config("paths.output_csv")?;
        Ok(())
    }

    /// Expected `previous_hash` of a persisted chain's first record: the
    /// explicit value, else the configured override, else `None` (genesis).
    /// Blank values count as unset, as they do for builds.
    pub fn verification_anchor(&self, explicit: Option<&str>) -> Result<Option<String>> {
        if let Some(anchor) = normalize_override(explicit, "anchor")? {
            return Ok(Some(anchor));
        }
        normalize_override(self.chain.genesis_hash.as_deref(), "chain.genesis_hash")
    }

    /// Enrichment settings, or `None` when no base URL is configured.
    pub fn enrichment_options(&self) -> Option<EnrichmentOptions> {
        let e = &self.enrichment;
        let base = e.base_url.as_deref().map(str::trim).filter(|b| !b.is_empty())?;
        Some(EnrichmentOptions {
            base_url: base.to_string(),
            add_qr_url: e.add_qr_url,
            qr_dir: e.qr_dir.clone(),
            qr_size: e.qr_size,
            qr_absolute: e.qr_absolute,
            qr_service_url: e.qr_service_url.clone(),
            workers: e.workers,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment.timeout_secs)
    }

    pub fn export_targets(&self) -> ExportTargets {
        ExportTargets {
            csv: self.paths.output_csv.clone(),
            json: self.paths.output_json.clone(),
            index: self.paths.output_index.clone(),
        }
    }
}

fn normalize_override(raw: Option<&str>, label: &str) -> Result<Option<String>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => normalize::normalize_hash(s, 2)
            .map(Some)
            .map_err(|e| CertChainError::Config(format!("{label}: {e}"))),
    }
}
