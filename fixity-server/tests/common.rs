use std::{net::SocketAddr, sync::Arc};

use anyhow::{Result, anyhow};
use axum_test::TestServer;
use fixity_core::database::SqliteDatabase;
use fixity_model::ScanRecord;
use fixity_server::{
    AppState,
    infra::config::{
        Config, ConfigMetadata, DatabaseConfig, IngestConfig, QueryConfig,
        ServerConfig,
    },
    routes::create_app,
};
use sqlx::SqlitePool;

// Code is used by test modules, but not in this scope
#[allow(unused)]
#[derive(Debug)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub token: String,
}

#[allow(unused)]
pub const MACHINE: &str = "M1";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            busy_timeout_ms: 1_000,
        },
        ingest: IngestConfig {
            flush_interval_ms: 60_000,
            flush_max_rows: 1_000,
            max_pending_rows: 10_000,
            shutdown_drain_ms: 1_000,
            max_records_per_request: 50,
        },
        query: QueryConfig::default(),
        metadata: ConfigMetadata::default(),
    }
}

/// Build a served router over `pool` and issue a token for [`MACHINE`].
///
/// No flush worker runs, so rows stay pending until a read flushes them.
#[allow(unused)]
pub async fn build_test_app(pool: SqlitePool) -> Result<TestApp> {
    build_test_app_with_config(pool, test_config()).await
}

pub async fn build_test_app_with_config(
    pool: SqlitePool,
    config: Config,
) -> Result<TestApp> {
    let database = SqliteDatabase::from_pool(pool);
    let token = database.tokens().create_or_rotate(MACHINE).await?;
    let state = AppState::new(Arc::new(config), database);

    let make_service = create_app(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();
    let server = TestServer::builder()
        .http_transport()
        .build(make_service)
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(TestApp {
        server,
        state,
        token,
    })
}

#[allow(unused)]
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

#[allow(unused)]
pub fn sha(c: char) -> String {
    c.to_string().repeat(64)
}

#[allow(unused)]
pub fn record(path: &str, digest: &str, scan_ts: &str) -> ScanRecord {
    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    let date = &scan_ts[..10];
    ScanRecord {
        file_path: path.into(),
        file_name: name.clone(),
        extension: ".dat".into(),
        size_bytes: 42,
        sha256: digest.into(),
        scan_ts: scan_ts.into(),
        urn: format!("{MACHINE}:{name}:.dat:42:{date}"),
    }
}
