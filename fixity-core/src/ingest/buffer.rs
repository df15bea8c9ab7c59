use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::{FileRecordStore, HashIdentity, PendingRow};
use crate::error::{FixityError, Result};

pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;
pub const DEFAULT_FLUSH_MAX_ROWS: usize = 1_000;
pub const DEFAULT_MAX_PENDING_ROWS: usize = 50_000;
pub const DEFAULT_SHUTDOWN_DRAIN_MS: u64 = 5_000;

/// Longest pause after a failed background flush.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestBufferConfig {
    pub flush_interval: Duration,
    pub flush_max_rows: usize,
    pub max_pending_rows: usize,
    pub shutdown_drain: Duration,
}

impl Default for IngestBufferConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            flush_max_rows: DEFAULT_FLUSH_MAX_ROWS,
            max_pending_rows: DEFAULT_MAX_PENDING_ROWS,
            shutdown_drain: Duration::from_millis(DEFAULT_SHUTDOWN_DRAIN_MS),
        }
    }
}

/// Cache key: (machine_name, file_path).
pub type PathKey = (String, String);

#[derive(Debug, Default)]
struct BufferInner {
    pending: VecDeque<PendingRow>,
    latest: HashMap<PathKey, String>,
}

/// Write-behind queue of accepted rows plus the latest-digest-per-path cache.
///
/// Rows leave the queue only after a successful commit. The mutex guards the
/// queue and cache bookkeeping; storage calls always happen after it is
/// released. `flush_gate` admits one flush at a time so rows commit in
/// enqueue order even when a failed chunk is requeued.
pub struct IngestBuffer {
    config: IngestBufferConfig,
    store: Arc<dyn FileRecordStore>,
    inner: Mutex<BufferInner>,
    flush_gate: AsyncMutex<()>,
    wakeup: Notify,
}

impl std::fmt::Debug for IngestBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("IngestBuffer")
            .field("config", &self.config)
            .field("pending", &inner.pending.len())
            .field("cached_paths", &inner.latest.len())
            .finish_non_exhaustive()
    }
}

impl IngestBuffer {
    pub fn new(store: Arc<dyn FileRecordStore>, config: IngestBufferConfig) -> Self {
        Self {
            config,
            store,
            inner: Mutex::new(BufferInner::default()),
            flush_gate: AsyncMutex::new(()),
            wakeup: Notify::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn FileRecordStore> {
        &self.store
    }

    /// Queue `rows` and overwrite the cache with `cache_updates`.
    ///
    /// Admission is all-or-nothing: if the rows would push the queue past
    /// `max_pending_rows`, nothing is queued, the cache is untouched and
    /// [`FixityError::BufferFull`] is returned.
    pub fn enqueue(
        &self,
        rows: Vec<PendingRow>,
        cache_updates: HashMap<PathKey, String>,
    ) -> Result<()> {
        let incoming = rows.len();
        {
            let mut inner = self.inner.lock();
            let pending = inner.pending.len();
            if pending + incoming > self.config.max_pending_rows {
                return Err(FixityError::BufferFull {
                    pending,
                    incoming,
                    max: self.config.max_pending_rows,
                });
            }
            inner.pending.extend(rows);
            inner.latest.extend(cache_updates);
        }

        if incoming > 0 {
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Cached digests for the requested paths of one machine. Misses are
    /// simply absent from the result.
    pub fn cached_latest_sha_by_path(
        &self,
        machine_name: &str,
        file_paths: &[String],
    ) -> HashMap<String, String> {
        let inner = self.inner.lock();
        file_paths
            .iter()
            .filter_map(|path| {
                inner
                    .latest
                    .get(&(machine_name.to_string(), path.clone()))
                    .map(|sha| (path.clone(), sha.clone()))
            })
            .collect()
    }

    /// Fill cache entries that are still missing. An entry already present
    /// was written by a newer enqueue and wins.
    pub fn prime_latest_sha(&self, updates: HashMap<PathKey, String>) {
        let mut inner = self.inner.lock();
        for (key, sha) in updates {
            inner.latest.entry(key).or_insert(sha);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// (sha256, file_name, file_path) of queued rows whose digest is in `shas`.
    pub fn pending_identities(&self, shas: &HashSet<&str>) -> Vec<HashIdentity> {
        let inner = self.inner.lock();
        inner
            .pending
            .iter()
            .filter(|row| shas.contains(row.sha256.as_str()))
            .map(|row| HashIdentity {
                sha256: row.sha256.clone(),
                file_name: row.file_name.clone(),
                file_path: row.file_path.clone(),
            })
            .collect()
    }

    /// Commit up to `max_rows` rows from the head of the queue, or all of
    /// them when `None`. Returns the number committed; zero means the queue
    /// was empty.
    ///
    /// On a storage error the popped rows go back to the head in their
    /// original order and the error is returned. Concurrent callers wait
    /// for the flush in progress.
    pub async fn flush(&self, max_rows: Option<usize>) -> Result<usize> {
        let _gate = self.flush_gate.lock().await;
        let batch: Vec<PendingRow> = {
            let mut inner = self.inner.lock();
            let take = max_rows
                .unwrap_or(usize::MAX)
                .min(inner.pending.len());
            inner.pending.drain(..take).collect()
        };

        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.insert_batch(&batch).await {
            Ok(_) => {
                debug!(rows = batch.len(), "ingest buffer flushed");
                Ok(batch.len())
            }
            Err(err) => {
                let mut inner = self.inner.lock();
                for row in batch.into_iter().rev() {
                    inner.pending.push_front(row);
                }
                Err(err)
            }
        }
    }

    /// Flush in `flush_max_rows` chunks until the queue is empty.
    async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let flushed = self.flush(Some(self.config.flush_max_rows)).await?;
            if flushed == 0 {
                return Ok(total);
            }
            total += flushed;
        }
    }

    /// Start the background flush worker. It runs until `shutdown` is
    /// cancelled, then makes one drain attempt bounded by `shutdown_drain`.
    pub fn spawn_worker(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let interval = buffer.config.flush_interval;
            let error_backoff = interval.min(MAX_ERROR_BACKOFF);
            info!(
                flush_interval_ms = interval.as_millis() as u64,
                flush_max_rows = buffer.config.flush_max_rows,
                max_pending_rows = buffer.config.max_pending_rows,
                "ingest flush worker started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = buffer.wakeup.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }

                if let Err(err) = buffer.drain().await {
                    warn!(
                        error = %err,
                        pending = buffer.pending_count(),
                        "background flush failed; retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(error_backoff) => {}
                    }
                }
            }

            buffer.shutdown_drain().await;
        })
    }

    /// Flush chunk by chunk until the queue is empty or `shutdown_drain`
    /// has elapsed. The deadline is checked between chunks; a chunk already
    /// being inserted is allowed to finish so its rows are either committed
    /// or back in the queue and counted.
    async fn shutdown_drain(&self) {
        let budget = self.config.shutdown_drain;
        let deadline = Instant::now() + budget;
        let mut flushed = 0;
        loop {
            if Instant::now() >= deadline {
                warn!(
                    drain_ms = budget.as_millis() as u64,
                    flushed,
                    "final flush ran out of time"
                );
                break;
            }
            match self.flush(Some(self.config.flush_max_rows)).await {
                Ok(0) => {
                    info!(flushed, "ingest flush worker stopped");
                    break;
                }
                Ok(rows) => flushed += rows,
                Err(err) => {
                    warn!(error = %err, flushed, "final flush failed");
                    break;
                }
            }
        }

        let lost = self.pending_count();
        if lost > 0 {
            warn!(lost, "ingest buffer stopped with uncommitted rows; they are lost");
        }
    }
}
