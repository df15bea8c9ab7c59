use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, RecordIssue, Result};

/// One hashed file as produced by an agent scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub extension: String,
    pub size_bytes: i64,
    pub sha256: String,
    /// RFC 3339 timestamp carrying an explicit offset.
    pub scan_ts: String,
    pub urn: String,
}

impl ScanRecord {
    pub fn validate(&self) -> std::result::Result<(), RecordIssue> {
        if self.file_path.trim().is_empty() {
            return Err(RecordIssue::EmptyPath);
        }
        if self.file_name.trim().is_empty() {
            return Err(RecordIssue::EmptyName);
        }
        if self.size_bytes < 0 {
            return Err(RecordIssue::NegativeSize);
        }
        if !is_sha256_hex(&self.sha256) {
            return Err(RecordIssue::InvalidSha256);
        }
        if DateTime::parse_from_rfc3339(&self.scan_ts).is_err() {
            return Err(RecordIssue::InvalidTimestamp);
        }
        if self.urn.trim().is_empty() {
            return Err(RecordIssue::EmptyUrn);
        }
        Ok(())
    }
}

/// Returns true for exactly 64 lowercase hexadecimal characters.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Validates an outgoing or incoming batch. `max` of `None` skips the size
/// ceiling check.
pub fn validate_batch(records: &[ScanRecord], max: Option<usize>) -> Result<()> {
    if records.is_empty() {
        return Err(ModelError::EmptyBatch);
    }
    if let Some(max) = max
        && records.len() > max
    {
        return Err(ModelError::BatchTooLarge {
            len: records.len(),
            max,
        });
    }
    for (index, record) in records.iter().enumerate() {
        record
            .validate()
            .map_err(|issue| ModelError::InvalidRecord { index, issue })?;
    }
    Ok(())
}

/// Body of `POST /ingest`. The machine identity comes from the bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub tag: String,
    pub records: Vec<ScanRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub file_path: String,
    pub previous_sha256: String,
    pub new_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateHash {
    pub sha256: String,
    pub distinct_file_names: u64,
    pub distinct_file_paths: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub received: usize,
    #[serde(default)]
    pub changed: Vec<ChangedFile>,
    #[serde(default)]
    pub duplicates: Vec<DuplicateHash>,
}
