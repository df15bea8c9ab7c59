pub mod file_records;
pub mod tokens;

use std::{fmt, str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
        SqliteSynchronous,
    },
};
use tracing::info;

use crate::error::{FixityError, Result};

pub use file_records::{
    FileRecordStore, HashIdentity, PendingRow, SqliteFileRecords,
};
pub use tokens::{MachineIdentity, SqliteTokenStore, TokenSummary};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/fixity.sqlite3";
const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

/// Pool handle plus the repositories built on it.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    file_records: SqliteFileRecords,
    tokens: SqliteTokenStore,
}

impl fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl SqliteDatabase {
    pub async fn connect(options: &DatabaseOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&options.url)
            .map_err(|e| {
                FixityError::InvalidInput(format!(
                    "invalid database url '{}': {e}",
                    options.url
                ))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout);

        let filename = connect_options.get_filename();
        if let Some(parent) = filename.parent()
            && !parent.as_os_str().is_empty()
            && filename.as_os_str() != ":memory:"
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                FixityError::Internal(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                FixityError::Internal(format!(
                    "Database connection failed: {e}"
                ))
            })?;

        info!(
            url = %options.url,
            max_connections = options.max_connections,
            busy_timeout_ms = options.busy_timeout.as_millis() as u64,
            "database pool initialized"
        );

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        let file_records = SqliteFileRecords::new(pool.clone());
        let tokens = SqliteTokenStore::new(pool.clone());
        Self {
            pool,
            file_records,
            tokens,
        }
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn file_records(&self) -> &SqliteFileRecords {
        &self.file_records
    }

    pub fn tokens(&self) -> &SqliteTokenStore {
        &self.tokens
    }
}
