//! One scan/upload cycle and the schedule-driven daemon loop.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use fixity_model::{ChangedFile, DuplicateHash, IngestRequest};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::enumerator::Enumerator;
use crate::error::{AgentError, Result};
use crate::host::HostInfo;
use crate::schedule::schedule_key;
use crate::scheduler::{ScanPass, quota_bytes, select};
use crate::state::ClientState;
use crate::upload::{RetryPolicy, Uploader};

pub const DEFAULT_POLL: Duration = Duration::from_secs(20);
const STOP_CHECK: Duration = Duration::from_millis(250);

/// Totals for one cycle, echoed as the final JSON line of a run.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub queued_files: usize,
    pub scanned_files: usize,
    pub scanned_bytes: u64,
    pub skipped_files: usize,
    pub uploaded_files: usize,
    pub batches: usize,
    pub changed: usize,
    pub duplicates: usize,
    pub quota_reached: bool,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        if self.upload_error.is_some() { 1 } else { 0 }
    }
}

/// Progress lines written to stdout, one JSON object each.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentEvent {
    BatchAcknowledged {
        batch: usize,
        received: usize,
        changed: Vec<ChangedFile>,
        duplicates: Vec<DuplicateHash>,
    },
    DaemonStarted {
        poll_sec: f64,
    },
    ScheduleTrigger {
        key: String,
        quota_gb: u64,
    },
    ScheduleDone {
        key: String,
        report: RunReport,
    },
    ScheduleError {
        key: String,
        error: String,
    },
}

/// The schedule key due at `now`, with its quota, unless it already ran
/// today or has no positive quota.
pub fn due_slot(
    config: &AgentConfig,
    state: &ClientState,
    now: DateTime<Local>,
) -> Option<(String, u64)> {
    let key = schedule_key(now);
    let quota = *config.schedule_quota_gb.get(&key)?;
    if quota == 0 || state.schedule_last_run(&key) == Some(now.date_naive()) {
        return None;
    }
    Some((key, quota))
}

#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    uploader: Uploader,
    host: HostInfo,
    stop: Arc<AtomicBool>,
}

impl Agent {
    pub fn new(config: AgentConfig, stop: Arc<AtomicBool>) -> Result<Self> {
        let uploader = Uploader::new(&config)?;
        Ok(Self {
            config,
            uploader,
            host: HostInfo::detect(),
            stop,
        })
    }

    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.uploader = self.uploader.with_policy(policy);
        self
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Liveness check, scan, then upload batch by batch. Each acknowledged
    /// batch advances and persists `state` before the next is sent.
    ///
    /// Errors before any upload (liveness, state I/O) are returned; an
    /// upload failure ends the cycle and is reported in
    /// [`RunReport::upload_error`].
    pub async fn run_cycle(
        &self,
        state: &mut ClientState,
        state_path: &Path,
        quota_gb: Option<u64>,
        emit: &mut dyn FnMut(AgentEvent),
    ) -> Result<RunReport> {
        self.uploader.hello().await?;

        let enumerator = Enumerator::from_config(&self.config);
        let snapshot = state.clone();
        let machine_name = self.config.machine_name.clone();
        let stop = Arc::clone(&self.stop);
        let quota = quota_bytes(quota_gb);
        let scan_ts = Utc::now();
        info!(quota_gb = quota_gb.unwrap_or(0), "scan starting");

        let (queued_files, outcome) = tokio::task::spawn_blocking(move || {
            let queue = select(enumerator.entries(), &snapshot);
            let pass = ScanPass {
                machine_name: &machine_name,
                quota_bytes: quota,
                scan_ts,
            };
            let outcome = pass.run(&queue, &stop);
            (queue.len(), outcome)
        })
        .await
        .map_err(|e| AgentError::Io(io::Error::other(format!("scan task failed: {e}"))))?;

        let mut report = RunReport {
            queued_files,
            scanned_files: outcome.records.len(),
            scanned_bytes: outcome.hashed_bytes,
            skipped_files: outcome.skipped,
            quota_reached: outcome.quota_reached,
            stopped: outcome.stopped,
            ..RunReport::default()
        };
        info!(
            queued = report.queued_files,
            hashed = report.scanned_files,
            bytes = report.scanned_bytes,
            skipped = report.skipped_files,
            "scan finished"
        );

        for batch in outcome.records.chunks(self.uploader.max_batch_records()) {
            if self.stopping() {
                report.stopped = true;
                break;
            }
            let request = IngestRequest {
                mac: self.host.mac.clone(),
                host_name: self.host.host_name.clone(),
                tag: self.config.tag.clone(),
                records: batch.to_vec(),
            };
            let response = match self.uploader.upload_batch(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(batch = report.batches, error = %err, "upload failed; ending run");
                    report.upload_error = Some(err.to_string());
                    break;
                }
            };

            for record in batch {
                if let Ok(ts) = DateTime::parse_from_rfc3339(&record.scan_ts) {
                    state.record_scan(&record.file_path, ts.with_timezone(&Utc));
                }
            }
            state.save(state_path)?;

            report.uploaded_files += batch.len();
            report.changed += response.changed.len();
            report.duplicates += response.duplicates.len();
            emit(AgentEvent::BatchAcknowledged {
                batch: report.batches,
                received: response.received,
                changed: response.changed,
                duplicates: response.duplicates,
            });
            report.batches += 1;
        }

        info!(
            uploaded = report.uploaded_files,
            batches = report.batches,
            changed = report.changed,
            duplicates = report.duplicates,
            "scan cycle finished"
        );
        Ok(report)
    }

    /// Poll the schedule every `poll` until the stop flag is raised.
    pub async fn run_daemon(
        &self,
        state: &mut ClientState,
        state_path: &Path,
        poll: Duration,
        emit: &mut dyn FnMut(AgentEvent),
    ) -> Result<()> {
        info!(poll_sec = poll.as_secs_f64(), "daemon started");
        emit(AgentEvent::DaemonStarted {
            poll_sec: poll.as_secs_f64(),
        });

        while !self.stopping() {
            let now = Local::now();
            if let Some((key, quota_gb)) = due_slot(&self.config, state, now) {
                info!(key = %key, quota_gb, "schedule triggered");
                emit(AgentEvent::ScheduleTrigger {
                    key: key.clone(),
                    quota_gb,
                });
                match self.run_cycle(state, state_path, Some(quota_gb), emit).await {
                    Ok(report) if report.upload_error.is_none() && !report.stopped => {
                        state.mark_schedule_run(&key, now.date_naive());
                        if let Err(err) = state.save(state_path) {
                            error!(key = %key, error = %err, "failed to record schedule run");
                        }
                        emit(AgentEvent::ScheduleDone { key, report });
                    }
                    Ok(report) => {
                        let error = report
                            .upload_error
                            .unwrap_or_else(|| "interrupted".to_string());
                        emit(AgentEvent::ScheduleError { key, error });
                    }
                    Err(err) => {
                        error!(key = %key, error = %err, "scheduled cycle failed");
                        emit(AgentEvent::ScheduleError {
                            key,
                            error: err.to_string(),
                        });
                    }
                }
            }
            self.pause(poll).await;
        }
        info!("daemon stopping");
        Ok(())
    }

    async fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(STOP_CHECK)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn due_slot_respects_quota_and_last_run() {
        let config = AgentConfig::from_json_str(
            r#"{"machine_name": "m", "schedule_quota_gb": {"Mon0910": 3, "Mon0911": 0}}"#,
        )
        .expect("config");
        let mut state = ClientState::new();
        let at_slot = Local.with_ymd_and_hms(2026, 3, 2, 9, 10, 45).unwrap();

        assert_eq!(
            due_slot(&config, &state, at_slot),
            Some(("Mon0910".to_string(), 3))
        );

        let zero_quota = Local.with_ymd_and_hms(2026, 3, 2, 9, 11, 0).unwrap();
        assert_eq!(due_slot(&config, &state, zero_quota), None);

        let off_slot = Local.with_ymd_and_hms(2026, 3, 2, 9, 12, 0).unwrap();
        assert_eq!(due_slot(&config, &state, off_slot), None);

        state.mark_schedule_run("Mon0910", at_slot.date_naive());
        assert_eq!(due_slot(&config, &state, at_slot), None);

        let next_week = Local.with_ymd_and_hms(2026, 3, 9, 9, 10, 0).unwrap();
        assert!(due_slot(&config, &state, next_week).is_some());
    }

    #[test]
    fn events_are_tagged_by_status() {
        let line = serde_json::to_value(AgentEvent::ScheduleTrigger {
            key: "Mon0910".into(),
            quota_gb: 3,
        })
        .expect("json");
        assert_eq!(line["status"], "schedule_trigger");
        assert_eq!(line["key"], "Mon0910");

        let report = RunReport {
            upload_error: Some("boom".into()),
            ..RunReport::default()
        };
        assert_eq!(report.exit_code(), 1);
        assert_eq!(RunReport::default().exit_code(), 0);
    }
}
