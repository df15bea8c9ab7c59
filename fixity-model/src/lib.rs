//! Data model definitions shared between the Fixity agent and server.
#![allow(missing_docs)]

pub mod error;
pub mod query;
pub mod records;
pub mod routes;
pub mod urn;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, RecordIssue, Result as ModelResult};
pub use query::{
    FileQueryResponse, FileRecordView, GraphFormat, GraphJson,
    MachineQueryResponse, MachinesResponse, NameMatch, NameQueryResponse,
    ShaSegment,
};
pub use records::{
    ChangedFile, DuplicateHash, IngestRequest, IngestResponse, ScanRecord,
    is_sha256_hex, validate_batch,
};
pub use urn::{build_urn, ceil_gib, scan_date_from_urn};
