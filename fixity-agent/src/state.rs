//! Durable client progress.
//!
//! The state file records, per absolute path, when that file was last hashed
//! *and acknowledged by the server*, plus the date each daemon schedule slot
//! last ran. It is rewritten atomically after every acknowledged batch so a
//! crash loses at most the batch in flight.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub machine_id: String,
    /// Absolute path → RFC 3339 timestamp (legacy files may hold a bare date).
    pub files: BTreeMap<String, String>,
    /// Schedule key → `YYYY-MM-DD`.
    pub schedule_last_run: BTreeMap<String, String>,
}

// Fields are declared in key order so the written document is sorted.
#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    files: BTreeMap<String, String>,
    #[serde(default)]
    machine_id: Option<String>,
    #[serde(default)]
    saved_at: Option<String>,
    #[serde(default)]
    schedule_last_run: BTreeMap<String, String>,
    #[serde(default)]
    version: Option<u32>,
}

/// RFC 3339 instant, or a bare `YYYY-MM-DD` read as midnight UTC.
pub fn parse_last_scan(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    /// Fresh state with a new machine id.
    pub fn new() -> Self {
        Self {
            machine_id: Uuid::new_v4().to_string(),
            files: BTreeMap::new(),
            schedule_last_run: BTreeMap::new(),
        }
    }

    /// Read `path`, or start fresh when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(state_error(path, err)),
        };
        let doc: StateDocument =
            serde_json::from_str(&text).map_err(|err| state_error(path, err))?;
        if let Some(version) = doc.version
            && version > STATE_VERSION
        {
            return Err(state_error(
                path,
                format!("unsupported state version {version}"),
            ));
        }
        Ok(Self {
            machine_id: doc
                .machine_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            files: doc.files,
            schedule_last_run: doc.schedule_last_run,
        })
    }

    /// Write to a sibling temp file, fsync it, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let doc = StateDocument {
            files: self.files.clone(),
            machine_id: Some(self.machine_id.clone()),
            saved_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
            schedule_last_run: self.schedule_last_run.clone(),
            version: Some(STATE_VERSION),
        };
        let body = serde_json::to_vec_pretty(&doc).map_err(|err| state_error(path, err))?;
        write_atomic(path, &body).map_err(|err| state_error(path, err))
    }

    pub fn last_scan(&self, path: &str) -> Option<DateTime<Utc>> {
        self.files.get(path).and_then(|raw| parse_last_scan(raw))
    }

    /// Advance `path` to `scanned_at` unless it already holds a later time.
    /// Returns whether the entry changed.
    pub fn record_scan(&mut self, path: &str, scanned_at: DateTime<Utc>) -> bool {
        if self
            .last_scan(path)
            .is_some_and(|existing| existing >= scanned_at)
        {
            return false;
        }
        self.files.insert(
            path.to_string(),
            scanned_at.to_rfc3339_opts(SecondsFormat::Micros, false),
        );
        true
    }

    pub fn schedule_last_run(&self, key: &str) -> Option<NaiveDate> {
        self.schedule_last_run
            .get(key)
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    }

    pub fn mark_schedule_run(&mut self, key: &str, date: NaiveDate) {
        self.schedule_last_run
            .insert(key.to_string(), date.format("%Y-%m-%d").to_string());
    }
}

fn state_error(path: &Path, err: impl std::fmt::Display) -> AgentError {
    AgentError::State {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp = temp_path_for(path);
    let written = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(body)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
        return written;
    }

    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
