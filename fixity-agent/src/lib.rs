//! Scanning agent for the Fixity file-integrity monitor.
//!
//! A run enumerates the configured roots, hashes files in priority order
//! (never-scanned first, then oldest scan first) up to an optional byte quota,
//! and posts the records to the server in small batches. Local state records
//! when each path was last acknowledged and is saved after every batch, so an
//! interrupted run resumes where it stopped.

pub mod config;
pub mod enumerator;
pub mod error;
pub mod hashing;
pub mod host;
pub mod lock;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod signals;
pub mod state;
pub mod upload;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use runner::{Agent, AgentEvent, RunReport};
pub use state::ClientState;
