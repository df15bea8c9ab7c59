use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fixity_model::{
    ChangedFile, DuplicateHash, IngestRequest, IngestResponse, ScanRecord,
    validate_batch,
};
use tracing::{debug, info};

use super::buffer::{IngestBuffer, PathKey};
use crate::database::{HashIdentity, PendingRow};
use crate::error::Result;

/// Largest `records` array a single ingest call may carry.
pub const DEFAULT_MAX_RECORDS_PER_REQUEST: usize = 5_000;

/// Who sent an ingest request and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestContext {
    pub machine_name: String,
    pub client_ip: String,
    pub received_at: DateTime<Utc>,
}

impl IngestContext {
    pub fn new(machine_name: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            client_ip: client_ip.into(),
            received_at: Utc::now(),
        }
    }
}

/// Validates ingest requests, computes change and duplicate reports, and
/// hands accepted rows to the [`IngestBuffer`].
#[derive(Debug, Clone)]
pub struct IngestService {
    buffer: Arc<IngestBuffer>,
    max_records_per_request: usize,
}

impl IngestService {
    pub fn new(buffer: Arc<IngestBuffer>, max_records_per_request: usize) -> Self {
        Self {
            buffer,
            max_records_per_request,
        }
    }

    pub fn buffer(&self) -> &Arc<IngestBuffer> {
        &self.buffer
    }

    pub async fn ingest(
        &self,
        context: &IngestContext,
        request: IngestRequest,
    ) -> Result<IngestResponse> {
        if request.records.is_empty() {
            return Ok(IngestResponse::default());
        }
        validate_batch(&request.records, Some(self.max_records_per_request))?;

        let machine = context.machine_name.as_str();

        // Last occurrence of a path within the request is its new digest.
        let mut paths: Vec<String> = Vec::new();
        let mut newest: HashMap<&str, &str> = HashMap::new();
        for record in &request.records {
            if newest
                .insert(record.file_path.as_str(), record.sha256.as_str())
                .is_none()
            {
                paths.push(record.file_path.clone());
            }
        }

        let previous = self.previous_digests(machine, &paths).await?;

        let changed: Vec<ChangedFile> = paths
            .iter()
            .filter_map(|path| {
                let prev = previous.get(path)?;
                let new = newest.get(path.as_str())?;
                (prev != new).then(|| ChangedFile {
                    file_path: path.clone(),
                    previous_sha256: prev.clone(),
                    new_sha256: (*new).to_string(),
                })
            })
            .collect();

        let duplicates = self.duplicates_for(&request.records).await?;

        let cache_updates: HashMap<PathKey, String> = newest
            .iter()
            .map(|(path, sha)| {
                ((machine.to_string(), (*path).to_string()), (*sha).to_string())
            })
            .collect();

        let received = request.records.len();
        let rows = pending_rows(context, request);
        self.buffer.enqueue(rows, cache_updates)?;

        info!(
            machine_name = machine,
            client_ip = %context.client_ip,
            received,
            changed = changed.len(),
            duplicates = duplicates.len(),
            "ingest accepted"
        );

        Ok(IngestResponse {
            received,
            changed,
            duplicates,
        })
    }

    /// Cache first; misses are read from storage and primed into the cache.
    async fn previous_digests(
        &self,
        machine: &str,
        paths: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut previous = self.buffer.cached_latest_sha_by_path(machine, paths);
        let misses: Vec<String> = paths
            .iter()
            .filter(|path| !previous.contains_key(*path))
            .cloned()
            .collect();
        if misses.is_empty() {
            return Ok(previous);
        }

        let stored = self
            .buffer
            .store()
            .latest_sha_by_path(machine, &misses)
            .await?;
        debug!(
            machine_name = machine,
            misses = misses.len(),
            found = stored.len(),
            "primed latest digests from storage"
        );

        self.buffer.prime_latest_sha(
            stored
                .iter()
                .map(|(path, sha)| ((machine.to_string(), path.clone()), sha.clone()))
                .collect(),
        );
        previous.extend(stored);
        Ok(previous)
    }

    async fn duplicates_for(&self, records: &[ScanRecord]) -> Result<Vec<DuplicateHash>> {
        let shas: HashSet<&str> = records.iter().map(|r| r.sha256.as_str()).collect();
        let mut extra = self.buffer.pending_identities(&shas);
        extra.extend(records.iter().map(|r| HashIdentity {
            sha256: r.sha256.clone(),
            file_name: r.file_name.clone(),
            file_path: r.file_path.clone(),
        }));

        let counts = self.buffer.store().identity_counts(&extra).await?;
        Ok(counts.into_iter().filter(is_duplicate).collect())
    }
}

/// Seen under more than one file name or file path.
fn is_duplicate(counts: &DuplicateHash) -> bool {
    counts.distinct_file_names > 1 || counts.distinct_file_paths > 1
}

fn pending_rows(context: &IngestContext, request: IngestRequest) -> Vec<PendingRow> {
    let IngestRequest {
        mac,
        host_name,
        tag,
        records,
    } = request;

    records
        .into_iter()
        .map(|record| PendingRow {
            machine_name: context.machine_name.clone(),
            mac: mac.clone(),
            file_name: record.file_name,
            file_path: record.file_path,
            size_bytes: record.size_bytes,
            sha256: record.sha256,
            tag: tag.clone(),
            host_name: host_name.clone(),
            client_ip: context.client_ip.clone(),
            scan_ts: record.scan_ts,
            urn: record.urn,
            ingested_at: context.received_at,
        })
        .collect()
}
