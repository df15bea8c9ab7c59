//! HTTP service for the Fixity file-integrity monitor.
//!
//! Agents post scan batches to `/ingest`; the rows are queued in the
//! write-behind [`IngestBuffer`](fixity_core::ingest::IngestBuffer) and
//! committed by a background worker. Query endpoints flush first so they
//! observe everything accepted so far.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
