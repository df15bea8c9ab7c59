//! # Fixity Core
//!
//! Server-side building blocks for the Fixity file-integrity service.
//!
//! ## Overview
//!
//! - **Storage**: SQLite via sqlx, with embedded migrations ([`MIGRATOR`]),
//!   an append-only `file_record` table and the machine token store
//! - **Write-behind ingest**: [`ingest::IngestBuffer`] accepts rows
//!   immediately, keeps a latest-hash-per-path cache and commits in the
//!   background
//! - **Detection**: per-request change and duplicate reports
//!   ([`ingest::IngestService`])
//! - **Provenance**: per-digest lineage segments and their ASCII, DOT and
//!   Mermaid renderings ([`graph`])
#![allow(missing_docs)]

/// SQLite connection management and repositories
pub mod database;

/// Error types and error handling utilities
pub mod error;

/// Provenance graph construction and rendering
pub mod graph;

/// Write-behind ingest buffer and per-request detection
pub mod ingest;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{FixityError, Result};
