use thiserror::Error;

use super::models::{Config, LimitRange};

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("query limit {field}: default {default} exceeds max {max}")]
    InvalidLimit {
        field: &'static str,
        default: i64,
        max: i64,
    },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let ingest = &config.ingest;

    for (field, value) in [
        ("INGEST_FLUSH_MAX_ROWS", ingest.flush_max_rows),
        ("INGEST_MAX_PENDING_ROWS", ingest.max_pending_rows),
        ("INGEST_MAX_RECORDS_PER_REQUEST", ingest.max_records_per_request),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroValue { field });
        }
    }
    if ingest.flush_interval_ms == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "INGEST_FLUSH_INTERVAL_MS",
        });
    }

    for (field, range) in [
        ("query.file", config.query.file),
        ("query.machine", config.query.machine),
        ("query.graph", config.query.graph),
        ("query.names", config.query.names),
    ] {
        validate_limit(field, range)?;
    }

    if ingest.max_records_per_request > ingest.max_pending_rows {
        warnings.push_with_hint(
            format!(
                "max_records_per_request ({}) exceeds max_pending_rows ({}); large requests will always be rejected",
                ingest.max_records_per_request, ingest.max_pending_rows
            ),
            "Raise INGEST_MAX_PENDING_ROWS or lower INGEST_MAX_RECORDS_PER_REQUEST",
        );
    }

    if config.database.is_in_memory() {
        warnings.push(
            "DATABASE_URL points at an in-memory database; ingested records are lost on restart",
        );
    }

    if ingest.shutdown_drain_ms == 0 {
        warnings.push(
            "INGEST_SHUTDOWN_DRAIN_MS is 0; rows still queued at shutdown will be dropped",
        );
    }

    Ok(warnings)
}

fn validate_limit(
    field: &'static str,
    range: LimitRange,
) -> Result<(), ConfigGuardRailError> {
    if range.max <= 0 || range.default <= 0 {
        return Err(ConfigGuardRailError::ZeroValue { field });
    }
    if range.default > range.max {
        return Err(ConfigGuardRailError::InvalidLimit {
            field,
            default: range.default,
            max: range.max,
        });
    }
    Ok(())
}
