//! Which files to hash this run, and in what order.
//!
//! Files the state has never recorded go first, in enumeration order, and
//! while any exist every already-scanned file waits. Once the backlog is
//! clear, files are revisited oldest scan first (ties broken by path). The
//! byte quota caps how much a run hashes but always lets at least one file
//! through, so a single file larger than the quota still makes progress.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use fixity_model::{ScanRecord, build_urn};
use serde::Serialize;
use tracing::debug;

use crate::enumerator::FileEntry;
use crate::hashing::sha256_file;
use crate::state::ClientState;

const GIB: u64 = 1024 * 1024 * 1024;

/// `None` and `Some(0)` both mean "no limit".
pub fn quota_bytes(quota_gb: Option<u64>) -> Option<u64> {
    quota_gb
        .filter(|gb| *gb > 0)
        .map(|gb| gb.saturating_mul(GIB))
}

/// Order `entries` for hashing.
pub fn select(entries: Vec<FileEntry>, state: &ClientState) -> Vec<FileEntry> {
    let mut unscanned = Vec::new();
    let mut scanned = Vec::new();
    for entry in entries {
        match state.last_scan(&entry.key()) {
            Some(ts) => scanned.push((ts, entry)),
            None => unscanned.push(entry),
        }
    }
    if !unscanned.is_empty() {
        return unscanned;
    }
    scanned.sort_by(|(a_ts, a), (b_ts, b)| (a_ts, &a.path).cmp(&(b_ts, &b.path)));
    scanned.into_iter().map(|(_, entry)| entry).collect()
}

/// What one pass over the queue produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<ScanRecord>,
    pub hashed_bytes: u64,
    /// Files that vanished or could not be read.
    pub skipped: usize,
    /// The stop flag ended the pass early.
    pub stopped: bool,
    /// The quota ended the pass early.
    pub quota_reached: bool,
}

/// Inputs that stay fixed for a whole pass.
#[derive(Debug, Clone)]
pub struct ScanPass<'a> {
    pub machine_name: &'a str,
    pub quota_bytes: Option<u64>,
    pub scan_ts: DateTime<Utc>,
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn bare_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

impl ScanPass<'_> {
    /// Hash `queue` in order until it is exhausted, the quota is met or `stop`
    /// is raised. Blocking; run it off the async executor.
    pub fn run(&self, queue: &[FileEntry], stop: &AtomicBool) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let scan_ts = self.scan_ts.to_rfc3339_opts(SecondsFormat::Micros, false);
        let scan_date = self.scan_ts.date_naive();

        for entry in queue {
            if stop.load(Ordering::Relaxed) {
                outcome.stopped = true;
                break;
            }
            if let Some(quota) = self.quota_bytes
                && !outcome.records.is_empty()
                && outcome.hashed_bytes >= quota
            {
                outcome.quota_reached = true;
                break;
            }
            if !entry.path.is_file() {
                debug!(path = %entry.path.display(), "file disappeared before hashing");
                outcome.skipped += 1;
                continue;
            }
            let sha256 = match sha256_file(&entry.path) {
                Ok(digest) => digest,
                Err(err) => {
                    debug!(path = %entry.path.display(), error = %err, "hashing failed; will retry next run");
                    outcome.skipped += 1;
                    continue;
                }
            };

            let file_name = file_name_of(&entry.path);
            let extension = bare_extension(&entry.path);
            let urn = build_urn(
                self.machine_name,
                &file_name,
                &extension,
                entry.size_bytes,
                scan_date,
            );
            outcome.records.push(ScanRecord {
                file_path: entry.key(),
                file_name,
                extension,
                size_bytes: i64::try_from(entry.size_bytes).unwrap_or(i64::MAX),
                sha256,
                scan_ts: scan_ts.clone(),
                urn,
            });
            outcome.hashed_bytes = outcome.hashed_bytes.saturating_add(entry.size_bytes);
        }
        outcome
    }
}

/// Counts behind the `debug-queue` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_files: usize,
    pub unscanned: usize,
    pub scanned: usize,
    pub state_entries: usize,
    pub orphaned_state_entries: usize,
}

/// Split of the current candidates for diagnostics, each class in priority order.
#[derive(Debug, Clone, Default)]
pub struct QueueReport {
    pub stats: QueueStats,
    pub unscanned: Vec<FileEntry>,
    pub scanned: Vec<FileEntry>,
    pub orphaned: Vec<String>,
}

pub fn queue_report(entries: Vec<FileEntry>, state: &ClientState) -> QueueReport {
    let known: HashSet<String> = entries.iter().map(FileEntry::key).collect();
    let orphaned: Vec<String> = state
        .files
        .keys()
        .filter(|path| !known.contains(*path))
        .cloned()
        .collect();

    let total_files = entries.len();
    let (unscanned, scanned): (Vec<FileEntry>, Vec<FileEntry>) = entries
        .into_iter()
        .partition(|entry| state.last_scan(&entry.key()).is_none());
    let scanned = select(scanned, state);

    QueueReport {
        stats: QueueStats {
            total_files,
            unscanned: unscanned.len(),
            scanned: scanned.len(),
            state_entries: state.files.len(),
            orphaned_state_entries: orphaned.len(),
        },
        unscanned,
        scanned,
        orphaned,
    }
}
