use std::{fmt, sync::Arc};

use fixity_core::database::SqliteDatabase;
use fixity_core::ingest::{IngestBuffer, IngestService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::infra::config::Config;

/// Handles shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<SqliteDatabase>,
    pub ingest: Arc<IngestService>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the ingest buffer to the database. The flush worker is not
    /// started; see [`AppState::spawn_flush_worker`].
    pub fn new(config: Arc<Config>, database: SqliteDatabase) -> Self {
        let buffer = Arc::new(IngestBuffer::new(
            Arc::new(database.file_records().clone()),
            config.ingest.buffer_config(),
        ));
        let ingest = Arc::new(IngestService::new(
            buffer,
            config.ingest.max_records_per_request,
        ));
        Self {
            config,
            database: Arc::new(database),
            ingest,
        }
    }

    pub fn buffer(&self) -> &Arc<IngestBuffer> {
        self.ingest.buffer()
    }

    pub fn spawn_flush_worker(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.buffer().spawn_worker(shutdown)
    }

    /// Commit everything queued so reads see it. Storage errors are logged
    /// and swallowed; the read then serves what is already committed.
    pub async fn flush_for_read(&self) {
        if let Err(err) = self.buffer().flush(None).await {
            warn!(error = %err, "pre-read flush failed; serving committed rows");
        }
    }
}
