use std::fmt::{self, Display};

/// Reason a single scan record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordIssue {
    EmptyPath,
    EmptyName,
    NegativeSize,
    InvalidSha256,
    InvalidTimestamp,
    EmptyUrn,
}

impl Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RecordIssue::EmptyPath => "file_path must not be empty",
            RecordIssue::EmptyName => "file_name must not be empty",
            RecordIssue::NegativeSize => "size_bytes must be >= 0",
            RecordIssue::InvalidSha256 => {
                "sha256 must be 64 lowercase hex characters"
            }
            RecordIssue::InvalidTimestamp => {
                "scan_ts must be an RFC 3339 timestamp with an offset"
            }
            RecordIssue::EmptyUrn => "urn must not be empty",
        };
        f.write_str(msg)
    }
}

/// Errors produced by batch and record validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    EmptyBatch,
    BatchTooLarge { len: usize, max: usize },
    InvalidRecord { index: usize, issue: RecordIssue },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::EmptyBatch => write!(f, "batch contains no records"),
            ModelError::BatchTooLarge { len, max } => {
                write!(f, "batch of {len} records exceeds the limit of {max}")
            }
            ModelError::InvalidRecord { index, issue } => {
                write!(f, "record {index}: {issue}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
