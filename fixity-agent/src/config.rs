//! Agent configuration file.
//!
//! A single JSON or TOML document (chosen by file extension) describes what a
//! machine scans, where it reports and when the daemon runs. Values are
//! normalised on load: extensions are lowercased with a leading dot, schedule
//! quotas accept numbers or numeric strings, and obviously broken values are
//! rejected up front so a run never starts with them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

pub const DEFAULT_MAX_BATCH_RECORDS: usize = 30;
pub const DEFAULT_HTTP_TIMEOUT_SEC: f64 = 30.0;
pub const DEFAULT_HTTP_RETRIES: u32 = 5;
pub const DEFAULT_STATE_PATH: &str = ".fixity_state.json";

/// Inclusive size window, in KiB, for files of one extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeThresholdKb {
    #[serde(rename = "lowtherehold", alias = "lowthreshold")]
    pub low_kb: u64,
    #[serde(rename = "uppertherehold", alias = "upperthreshold")]
    pub high_kb: u64,
}

impl SizeThresholdKb {
    pub fn admits(&self, size_bytes: u64) -> bool {
        let size_kb = size_bytes as f64 / 1024.0;
        size_kb >= self.low_kb as f64 && size_kb <= self.high_kb as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAgentConfig")]
pub struct AgentConfig {
    pub machine_name: String,
    pub server_url: String,
    pub auth_token: String,
    pub scan_paths: Vec<String>,
    pub exclude_subdirs: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub size_threshold_kb_by_ext: BTreeMap<String, SizeThresholdKb>,
    pub schedule_quota_gb: BTreeMap<String, u64>,
    pub state_path: PathBuf,
    pub tag: String,
    pub follow_symlinks: bool,
    pub max_batch_records: usize,
    pub http_timeout_sec: f64,
    pub http_retries: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuotaValue {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawAgentConfig {
    machine_name: String,
    #[serde(default)]
    server_url: String,
    #[serde(default)]
    auth_token: String,
    #[serde(default = "default_scan_paths")]
    scan_paths: Vec<String>,
    #[serde(default)]
    exclude_subdirs: Vec<String>,
    #[serde(default)]
    exclude_extensions: Vec<String>,
    #[serde(default)]
    size_threshold_kb_by_ext: BTreeMap<String, SizeThresholdKb>,
    #[serde(default)]
    schedule_quota_gb: BTreeMap<String, QuotaValue>,
    #[serde(default = "default_state_path")]
    state_path: PathBuf,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    follow_symlinks: bool,
    #[serde(default = "default_max_batch_records")]
    max_batch_records: usize,
    #[serde(default = "default_http_timeout_sec")]
    http_timeout_sec: f64,
    #[serde(default = "default_http_retries")]
    http_retries: u32,
}

fn default_scan_paths() -> Vec<String> {
    vec![".".to_string()]
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_max_batch_records() -> usize {
    DEFAULT_MAX_BATCH_RECORDS
}

fn default_http_timeout_sec() -> f64 {
    DEFAULT_HTTP_TIMEOUT_SEC
}

fn default_http_retries() -> u32 {
    DEFAULT_HTTP_RETRIES
}

/// `"JPG"`, `".jpg"` and `" jpg "` all become `".jpg"`; blank entries vanish.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let ext = raw.trim().to_lowercase();
    if ext.is_empty() {
        return None;
    }
    if ext.starts_with('.') {
        Some(ext)
    } else {
        Some(format!(".{ext}"))
    }
}

impl TryFrom<RawAgentConfig> for AgentConfig {
    type Error = String;

    fn try_from(raw: RawAgentConfig) -> std::result::Result<Self, Self::Error> {
        let machine_name = raw.machine_name.trim().to_string();
        if machine_name.is_empty() {
            return Err("machine_name must not be empty".into());
        }
        if raw.max_batch_records == 0 {
            return Err("max_batch_records must be >= 1".into());
        }
        if !(raw.http_timeout_sec.is_finite() && raw.http_timeout_sec > 0.0) {
            return Err("http_timeout_sec must be a positive number".into());
        }

        let exclude_extensions = raw
            .exclude_extensions
            .iter()
            .filter_map(|ext| normalize_extension(ext))
            .collect();

        let mut size_threshold_kb_by_ext = BTreeMap::new();
        for (ext, window) in raw.size_threshold_kb_by_ext {
            let Some(ext) = normalize_extension(&ext) else {
                continue;
            };
            if window.low_kb > window.high_kb {
                return Err(format!(
                    "size threshold for {ext}: lower bound {} exceeds upper bound {}",
                    window.low_kb, window.high_kb
                ));
            }
            size_threshold_kb_by_ext.insert(ext, window);
        }

        let mut schedule_quota_gb = BTreeMap::new();
        for (key, value) in raw.schedule_quota_gb {
            let quota = match value {
                QuotaValue::Number(n) => n,
                QuotaValue::Text(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    text.parse::<i64>().map_err(|_| {
                        format!("schedule {key}: quota '{text}' is not a whole number")
                    })?
                }
            };
            let quota = u64::try_from(quota)
                .map_err(|_| format!("schedule {key}: quota must be >= 0"))?;
            schedule_quota_gb.insert(key, quota);
        }

        Ok(Self {
            machine_name,
            server_url: raw.server_url.trim().to_string(),
            auth_token: raw.auth_token.trim().to_string(),
            scan_paths: raw.scan_paths,
            exclude_subdirs: raw.exclude_subdirs,
            exclude_extensions,
            size_threshold_kb_by_ext,
            schedule_quota_gb,
            state_path: raw.state_path,
            tag: raw.tag,
            follow_symlinks: raw.follow_symlinks,
            max_batch_records: raw.max_batch_records,
            http_timeout_sec: raw.http_timeout_sec,
            http_retries: raw.http_retries,
        })
    }
}

impl AgentConfig {
    /// Load a `.toml` file as TOML and anything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed = if is_toml {
            Self::from_toml_str(&text)
        } else {
            Self::from_json_str(&text)
        };
        parsed.map_err(|message| {
            AgentError::Config(format!("{}: {message}", path.display()))
        })
    }

    pub fn from_json_str(text: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    pub fn from_toml_str(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Settings a run or the daemon needs beyond what parsing checks.
    pub fn require_upload_target(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(AgentError::Config("server_url is empty in config".into()));
        }
        if self.auth_token.is_empty() {
            return Err(AgentError::Config("auth_token is empty in config".into()));
        }
        Ok(())
    }

    /// Copy safe to print: the auth token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.auth_token.is_empty() {
            copy.auth_token = "<redacted>".into();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_and_normalisation() {
        let config = AgentConfig::from_json_str(
            r#"{
                "machine_name": " nas-01 ",
                "exclude_extensions": ["TMP", ".Log", "  "],
                "size_threshold_kb_by_ext": {
                    "MP4": {"lowthreshold": 10, "upperthreshold": 20},
                    ".iso": {"lowtherehold": 0, "uppertherehold": 5}
                },
                "schedule_quota_gb": {"Mon0910": 5, "Tue0800": "2", "Wed0100": ""}
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.machine_name, "nas-01");
        assert_eq!(config.scan_paths, vec!["."]);
        assert_eq!(config.exclude_extensions, vec![".tmp", ".log"]);
        assert_eq!(
            config.size_threshold_kb_by_ext[".mp4"],
            SizeThresholdKb {
                low_kb: 10,
                high_kb: 20
            }
        );
        assert!(config.size_threshold_kb_by_ext.contains_key(".iso"));
        assert_eq!(config.schedule_quota_gb.get("Mon0910"), Some(&5));
        assert_eq!(config.schedule_quota_gb.get("Tue0800"), Some(&2));
        assert!(!config.schedule_quota_gb.contains_key("Wed0100"));
        assert_eq!(config.max_batch_records, DEFAULT_MAX_BATCH_RECORDS);
        assert_eq!(config.http_retries, DEFAULT_HTTP_RETRIES);
        assert!(!config.follow_symlinks);
    }

    #[test]
    fn toml_is_accepted() {
        let config = AgentConfig::from_toml_str(
            r#"
            machine_name = "laptop"
            server_url = "https://fixity.example.net"
            auth_token = "secret"
            scan_paths = ["/home/me"]
            max_batch_records = 10

            [schedule_quota_gb]
            Fri2330 = 50
            "#,
        )
        .expect("valid config");
        assert_eq!(config.max_batch_records, 10);
        assert_eq!(config.schedule_quota_gb.get("Fri2330"), Some(&50));
        assert!(config.require_upload_target().is_ok());
        assert_eq!(config.redacted().auth_token, "<redacted>");
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            r#"{"machine_name": ""}"#,
            r#"{"machine_name": "m", "max_batch_records": 0}"#,
            r#"{"machine_name": "m", "http_timeout_sec": 0}"#,
            r#"{"machine_name": "m", "schedule_quota_gb": {"Mon0000": -1}}"#,
            r#"{"machine_name": "m", "schedule_quota_gb": {"Mon0000": "lots"}}"#,
            r#"{"machine_name": "m", "size_threshold_kb_by_ext": {"a": {"lowtherehold": 5, "uppertherehold": 1}}}"#,
            r#"{"server_url": "http://x"}"#,
        ] {
            assert!(AgentConfig::from_json_str(bad).is_err(), "accepted: {bad}");
        }
    }

    #[test]
    fn missing_upload_target_is_a_config_error() {
        let config =
            AgentConfig::from_json_str(r#"{"machine_name": "m"}"#).expect("valid");
        assert!(matches!(
            config.require_upload_target(),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn threshold_window_is_inclusive() {
        let window = SizeThresholdKb {
            low_kb: 1,
            high_kb: 2,
        };
        assert!(!window.admits(1023));
        assert!(window.admits(1024));
        assert!(window.admits(2048));
        assert!(!window.admits(2049));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let json = dir.path().join("agent.json");
        fs::write(&json, r#"{"machine_name": "j"}"#).expect("write");
        let toml_path = dir.path().join("agent.TOML");
        fs::write(&toml_path, "machine_name = \"t\"\n").expect("write");

        assert_eq!(AgentConfig::load(&json).expect("json").machine_name, "j");
        assert_eq!(AgentConfig::load(&toml_path).expect("toml").machine_name, "t");
        assert!(matches!(
            AgentConfig::load(&dir.path().join("missing.json")),
            Err(AgentError::Config(_))
        ));
    }
}
