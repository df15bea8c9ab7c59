pub mod graph;
pub mod health;
pub mod ingest;
pub mod query;

use crate::infra::errors::{AppError, AppResult};

/// Lowercased digest, or 400 unless the input is exactly 64 hex characters.
pub(crate) fn normalize_sha256(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 64 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(AppError::bad_request("sha256 must be 64 hex characters"))
    }
}
