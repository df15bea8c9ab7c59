use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A persisted scan record as returned by the query endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecordView {
    pub machine_name: String,
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub tag: String,
    pub host_name: String,
    pub client_ip: String,
    pub scan_ts: String,
    pub urn: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQueryResponse {
    pub sha256: String,
    /// Total rows stored for the digest, independent of `limit`.
    pub sha256_count: i64,
    pub records: Vec<FileRecordView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineQueryResponse {
    pub machine_name: String,
    pub records: Vec<FileRecordView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinesResponse {
    pub machines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMatch {
    pub machine_name: String,
    pub file_name: String,
    pub sha256: String,
    pub scan_ts: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameQueryResponse {
    pub substring: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    pub records: Vec<NameMatch>,
}

/// Contiguous date span during which one (machine, path, name) identity held
/// a given digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaSegment {
    pub machine_name: String,
    pub file_path: String,
    pub file_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphJson {
    pub sha256: String,
    pub segments: Vec<ShaSegment>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    #[default]
    Ascii,
    Dot,
    Mermaid,
    Json,
}

impl GraphFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            GraphFormat::Ascii => "ascii",
            GraphFormat::Dot => "dot",
            GraphFormat::Mermaid => "mermaid",
            GraphFormat::Json => "json",
        }
    }
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ascii" => Ok(GraphFormat::Ascii),
            "dot" => Ok(GraphFormat::Dot),
            "mermaid" => Ok(GraphFormat::Mermaid),
            "json" => Ok(GraphFormat::Json),
            other => Err(format!(
                "unknown graph format '{other}' (expected ascii, dot, mermaid or json)"
            )),
        }
    }
}
