//! Daemon schedule keys and cross-config verification.
//!
//! A key is `DddHHMM` in local time (`Mon0910`). `verify` loads several agent
//! configs that share a machine and flags keys that do not parse and slots
//! from different configs on the same day closer than a minimum gap.

use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Local, Weekday};
use regex::Regex;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::error::Result;

pub const DEFAULT_MIN_GAP_MIN: u32 = 10;

static SCHEDULE_KEY: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(Mon|Tue|Wed|Thu|Fri|Sat|Sun)(\d{2})(\d{2})$"));

/// Key for the minute containing `now`.
pub fn schedule_key(now: DateTime<Local>) -> String {
    now.format("%a%H%M").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub day: Weekday,
    /// Minutes after local midnight.
    pub minutes: u32,
}

pub fn parse_schedule_key(key: &str) -> Option<ScheduleSlot> {
    let caps = SCHEDULE_KEY.as_ref().ok()?.captures(key)?;
    let day = caps[1].parse::<Weekday>().ok()?;
    let hours: u32 = caps[2].parse().ok()?;
    let minutes: u32 = caps[3].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(ScheduleSlot {
        day,
        minutes: hours * 60 + minutes,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub config_path: PathBuf,
    pub tag: String,
    pub key: String,
    pub slot: ScheduleSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidKey {
    pub config: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleConflict {
    pub config_a: String,
    pub config_b: String,
    pub tag_a: String,
    pub tag_b: String,
    pub key_a: String,
    pub key_b: String,
    pub gap_min: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub configs: usize,
    pub entries: usize,
    pub invalid: Vec<InvalidKey>,
    pub conflicts: Vec<ScheduleConflict>,
}

impl ScheduleReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty() && self.conflicts.is_empty()
    }
}

/// Active (quota > 0) schedule entries across `configs`, plus the keys that
/// failed to parse.
pub fn collect_entries(
    configs: &[(PathBuf, AgentConfig)],
) -> (Vec<ScheduleEntry>, Vec<InvalidKey>) {
    let mut entries = Vec::new();
    let mut invalid = Vec::new();
    for (path, config) in configs {
        for (key, quota) in &config.schedule_quota_gb {
            if *quota == 0 {
                continue;
            }
            match parse_schedule_key(key) {
                Some(slot) => entries.push(ScheduleEntry {
                    config_path: path.clone(),
                    tag: config.tag.clone(),
                    key: key.clone(),
                    slot,
                }),
                None => invalid.push(InvalidKey {
                    config: path.display().to_string(),
                    key: key.clone(),
                }),
            }
        }
    }
    (entries, invalid)
}

/// Same-day pairs from different configs closer than `min_gap_min` minutes.
pub fn find_conflicts(entries: &[ScheduleEntry], min_gap_min: u32) -> Vec<ScheduleConflict> {
    let mut conflicts = Vec::new();
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            if a.config_path == b.config_path || a.slot.day != b.slot.day {
                continue;
            }
            let gap = a.slot.minutes.abs_diff(b.slot.minutes);
            if gap < min_gap_min {
                conflicts.push(ScheduleConflict {
                    config_a: a.config_path.display().to_string(),
                    config_b: b.config_path.display().to_string(),
                    tag_a: a.tag.clone(),
                    tag_b: b.tag.clone(),
                    key_a: a.key.clone(),
                    key_b: b.key.clone(),
                    gap_min: gap,
                });
            }
        }
    }
    conflicts
}

pub fn verify_configs(configs: &[(PathBuf, AgentConfig)], min_gap_min: u32) -> ScheduleReport {
    let (entries, invalid) = collect_entries(configs);
    let conflicts = find_conflicts(&entries, min_gap_min);
    ScheduleReport {
        configs: configs.len(),
        entries: entries.len(),
        invalid,
        conflicts,
    }
}

/// Load every path, then verify. Any load failure aborts.
pub fn verify_paths(paths: &[PathBuf], min_gap_min: u32) -> Result<ScheduleReport> {
    let configs = paths
        .iter()
        .map(|path| -> Result<(PathBuf, AgentConfig)> {
            Ok((path.clone(), AgentConfig::load(path)?))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(verify_configs(&configs, min_gap_min))
}
