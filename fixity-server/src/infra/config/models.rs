use std::{net::SocketAddr, path::PathBuf, time::Duration};

use fixity_core::database::DatabaseOptions;
use fixity_core::ingest::IngestBufferConfig;

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub query: QueryConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            url: self.url.clone(),
            max_connections: self.max_connections,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub flush_interval_ms: u64,
    pub flush_max_rows: usize,
    pub max_pending_rows: usize,
    pub shutdown_drain_ms: u64,
    pub max_records_per_request: usize,
}

impl IngestConfig {
    pub fn buffer_config(&self) -> IngestBufferConfig {
        IngestBufferConfig {
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            flush_max_rows: self.flush_max_rows,
            max_pending_rows: self.max_pending_rows,
            shutdown_drain: Duration::from_millis(self.shutdown_drain_ms),
        }
    }
}

/// Default and ceiling for a `limit` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRange {
    pub default: i64,
    pub max: i64,
}

impl LimitRange {
    pub const fn new(default: i64, max: i64) -> Self {
        Self { default, max }
    }

    /// Missing values take the default; everything is clamped to `[1, max]`.
    pub fn resolve(&self, requested: Option<i64>) -> i64 {
        requested.unwrap_or(self.default).clamp(1, self.max.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    pub file: LimitRange,
    pub machine: LimitRange,
    pub graph: LimitRange,
    pub names: LimitRange,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            file: LimitRange::new(100, 1_000),
            machine: LimitRange::new(200, 5_000),
            graph: LimitRange::new(20_000, 200_000),
            names: LimitRange::new(1_000, 50_000),
        }
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
