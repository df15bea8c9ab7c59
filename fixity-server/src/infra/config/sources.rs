use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub ingest: FileIngestConfig,
    #[serde(default)]
    pub query: FileQueryConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileIngestConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_max_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_drain_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records_per_request: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileQueryConfig {
    #[serde(default)]
    pub file: FileLimitRange,
    #[serde(default)]
    pub machine: FileLimitRange,
    #[serde(default)]
    pub graph: FileLimitRange,
    #[serde(default)]
    pub names: FileLimitRange,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLimitRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub database_busy_timeout_ms: Option<u64>,
    pub ingest_flush_interval_ms: Option<u64>,
    pub ingest_flush_max_rows: Option<usize>,
    pub ingest_max_pending_rows: Option<usize>,
    pub ingest_shutdown_drain_ms: Option<u64>,
    pub ingest_max_records_per_request: Option<usize>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        let mut env_config = Self::default();

        env_config.config_path =
            std::env::var("FIXITY_CONFIG").ok().map(PathBuf::from);
        env_config.server_host = std::env::var("SERVER_HOST").ok();
        env_config.server_port = parse_var("SERVER_PORT");
        env_config.database_url = std::env::var("DATABASE_URL").ok();
        env_config.database_max_connections =
            parse_var("FIXITY_DB_MAX_CONNECTIONS");
        env_config.database_busy_timeout_ms =
            parse_var("FIXITY_DB_BUSY_TIMEOUT_MS");

        env_config.ingest_flush_interval_ms =
            parse_var("INGEST_FLUSH_INTERVAL_MS");
        env_config.ingest_flush_max_rows = parse_var("INGEST_FLUSH_MAX_ROWS");
        env_config.ingest_max_pending_rows =
            parse_var("INGEST_MAX_PENDING_ROWS");
        env_config.ingest_shutdown_drain_ms =
            parse_var("INGEST_SHUTDOWN_DRAIN_MS");
        env_config.ingest_max_records_per_request =
            parse_var("INGEST_MAX_RECORDS_PER_REQUEST");

        env_config
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}
