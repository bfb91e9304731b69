use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use certchain_core::{
    chain::CertificateRecord,
    config::CertChainConfig,
    export,
    index::HashIndex,
    input,
    pipeline::{self, BuildReport},
    util,
    verify::{self, Verdict},
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "certchain",
    version = util::VERSION,
    about = "Issue and verify hash-chained certificates"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

/// Overrides shared by every command that writes artifacts.
#[derive(Args, Debug)]
struct BuildArgs {
    /// Input CSV with CertID, RecipientName, CourseTitle, DateIssued,
    /// PreviousHash, CurrentHash columns.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Chained CSV output.
    #[arg(long)]
    output: Option<PathBuf>,
    /// JSON export of records (for web verification).
    #[arg(long)]
    json: Option<PathBuf>,
    /// JSON hash index (hash -> position).
    #[arg(long)]
    index: Option<PathBuf>,
    /// Explicit previous hash for the first record.
    #[arg(long)]
    genesis: Option<String>,
    /// Verification page base; adds VerificationURL as <base-url>/?hash=<CurrentHash>.
    #[arg(long)]
    base_url: Option<String>,
    /// Directory to save one QR PNG per certificate (requires --base-url).
    #[arg(long)]
    qr_dir: Option<PathBuf>,
    /// Square QR image size in pixels.
    #[arg(long)]
    qr_size: Option<u32>,
    /// Include a QRCodeURL column pointing at the online QR image (requires --base-url).
    #[arg(long)]
    add_qr_url: bool,
    /// Store QRCodePath as an absolute path.
    #[arg(long)]
    qr_absolute: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chain the input CSV and write the CSV, JSON and index artifacts.
    Build(BuildArgs),

    /// Verify an exported JSON chain, or a single certificate by hash.
    Verify {
        #[arg(long)]
        chain: PathBuf,
        /// Verify only through the certificate with this hash.
        #[arg(long)]
        hash: Option<String>,
        /// Hash index to use for the lookup (rebuilt from the chain if omitted).
        #[arg(long)]
        index: Option<PathBuf>,
        /// Expected previous hash of the first record (defaults to genesis).
        #[arg(long)]
        anchor: Option<String>,
    },

    /// Print the chain position of a hash using an index file.
    Lookup {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        hash: String,
    },

    /// Append the input CSV as a new segment onto an exported JSON chain.
    Extend {
        /// Existing JSON chain export.
        #[arg(long)]
        chain: PathBuf,
        /// Expected previous hash of the existing chain's first record.
        #[arg(long)]
        anchor: Option<String>,
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Append a certificate with a generated CertID to the input, then rebuild.
    Add {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        course: String,
        /// Issue date, YYYY-MM-DD.
        #[arg(long)]
        date: String,
        /// Only append to the input CSV.
        #[arg(long)]
        no_rebuild: bool,
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Print version information.
    Version,
}

#[derive(Debug, Serialize)]
struct VerifyOutput<'a> {
    authentic: bool,
    verdict: Verdict,
    position: Option<usize>,
    record: Option<&'a CertificateRecord>,
    records_checked: usize,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = CertChainConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();

    init_logging(&cfg.logging).context("init logging")?;

    match cli.cmd {
        Commands::Build(args) => {
            apply_build_args(&mut cfg, args)?;
            let report = pipeline::build_and_export(&cfg).context("build chain")?;
            log_report(&report);
        }

        Commands::Verify {
            chain,
            hash,
            index,
            anchor,
        } => {
            let records = export::read_chain_json(&chain).context("read chain")?;
            let anchor = cfg
                .verification_anchor(anchor.as_deref())
                .context("invalid anchor")?;
            let authentic = match hash {
                None => {
                    let verdict = verify::verify_chain(&records, anchor.as_deref());
                    print_json(&VerifyOutput {
                        authentic: verdict.is_valid(),
                        verdict,
                        position: None,
                        record: None,
                        records_checked: records.len(),
                    })?;
                    verdict.is_valid()
                }
                Some(hash) => {
                    let idx = match index {
                        Some(p) => HashIndex::load(&p).context("load hash index")?,
                        None => HashIndex::from_records(&records),
                    };
                    match verify::verify_hash(&records, &idx, &hash, anchor.as_deref()) {
                        Some(v) => {
                            print_json(&VerifyOutput {
                                authentic: v.verdict.is_valid(),
                                verdict: v.verdict,
                                position: Some(v.position),
                                record: Some(v.record),
                                records_checked: v.position + 1,
                            })?;
                            v.verdict.is_valid()
                        }
                        None => {
                            warn!(hash = %hash, "hash not found");
                            println!("not found: {hash}");
                            false
                        }
                    }
                }
            };
            if !authentic {
                std::process::exit(1);
            }
        }

        Commands::Lookup { index, hash } => {
            let idx = HashIndex::load(&index).context("load hash index")?;
            match idx.lookup(&hash) {
                Some(pos) => println!("{pos}"),
                None => {
                    println!("not found: {hash}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Extend {
            chain,
            anchor,
            build,
        } => {
            apply_build_args(&mut cfg, build)?;
            let anchor = cfg
                .verification_anchor(anchor.as_deref())
                .context("invalid anchor")?;
            let report = pipeline::extend_and_export(&cfg, &chain, anchor.as_deref())
                .context("extend chain")?;
            log_report(&report);
        }

        Commands::Add {
            recipient,
            course,
            date,
            no_rebuild,
            build,
        } => {
            apply_build_args(&mut cfg, build)?;
            let cert = input::append_certificate(&cfg.paths.input, &recipient, &course, &date)
                .context("append certificate")?;
            println!("{}", cert.cert_id);
            if !no_rebuild {
                let report = pipeline::build_and_export(&cfg).context("rebuild chain")?;
                log_report(&report);
            }
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn apply_build_args(cfg: &mut CertChainConfig, args: BuildArgs) -> Result<()> {
    if let Some(p) = args.input {
        cfg.paths.input = util::canonicalize_if_exists(&p, "input")?;
    }
    if let Some(p) = args.output {
        cfg.paths.output_csv = p;
    }
    if let Some(p) = args.json {
        cfg.paths.output_json = Some(p);
    }
    if let Some(p) = args.index {
        cfg.paths.output_index = Some(p);
    }
    if let Some(g) = args.genesis {
        cfg.chain.genesis_hash = Some(g);
    }
    if let Some(b) = args.base_url {
        cfg.enrichment.base_url = Some(b);
    }
    if let Some(d) = args.qr_dir {
        cfg.enrichment.qr_dir = Some(d);
    }
    if let Some(s) = args.qr_size {
        cfg.enrichment.qr_size = s;
    }
    cfg.enrichment.add_qr_url |= args.add_qr_url;
    cfg.enrichment.qr_absolute |= args.qr_absolute;
    cfg.validate().context("invalid configuration")?;
    Ok(())
}

fn log_report(report: &BuildReport) {
    for (artifact, path) in &report.export.written {
        info!(%artifact, path = %path.display(), "wrote");
    }
    for w in &report.warnings {
        warn!(position = w.position, cert_id = %w.cert_id, error = %w.message, "enrichment skipped");
    }
    info!(
        records = report.chain.len(),
        last_hash = report.chain.last_hash(),
        "done"
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

fn init_logging(cfg: &certchain_core::config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
