//! Tamper-evident certificate issuance over an append-only hash chain.
//!
//! This crate provides:
//! - Field normalization and validation for certificate input rows
//! - A single-pass SHA-256 linker producing a strictly ordered chain
//! - Chain verification and hash lookup for authenticity checks
//! - Deterministic export to chained CSV, JSON, and a hash index
//! - Best-effort enrichment (verification URL, QR image) outside the hash
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod config;
pub mod error;

pub mod chain;
pub mod enrich;
pub mod export;
pub mod index;
pub mod input;
pub mod normalize;
pub mod pipeline;
pub mod util;
pub mod verify;
