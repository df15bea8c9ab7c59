//! Candidate discovery under the configured scan roots.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{AgentConfig, SizeThresholdKb};

/// A regular file found by one enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl FileEntry {
    /// State-file key for this entry.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Lowercased extension with its leading dot, or `""`.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~')
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']));
    }
    PathBuf::from(raw)
}

/// Canonical form when the path exists, else a lexical absolute path.
fn absolutize(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Clone)]
pub struct Enumerator {
    roots: Vec<PathBuf>,
    excluded_dir_names: HashSet<String>,
    excluded_dir_paths: Vec<PathBuf>,
    excluded_extensions: HashSet<String>,
    size_windows: BTreeMap<String, SizeThresholdKb>,
    follow_symlinks: bool,
}

impl Enumerator {
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut excluded_dir_names = HashSet::new();
        let mut excluded_dir_paths = Vec::new();
        for raw in &config.exclude_subdirs {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            // Entries with a separator are paths; bare words match any directory name.
            if raw.starts_with('~') || raw.contains(['/', '\\']) {
                excluded_dir_paths.push(absolutize(&expand_home(raw)));
            } else {
                excluded_dir_names.insert(raw.to_string());
            }
        }

        Self {
            roots: config
                .scan_paths
                .iter()
                .map(|root| expand_home(root.trim()))
                .collect(),
            excluded_dir_names,
            excluded_dir_paths,
            excluded_extensions: config.exclude_extensions.iter().cloned().collect(),
            size_windows: config.size_threshold_kb_by_ext.clone(),
            follow_symlinks: config.follow_symlinks,
        }
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }
        if entry.depth() > 0
            && self
                .excluded_dir_names
                .contains(entry.file_name().to_string_lossy().as_ref())
        {
            return true;
        }
        self.excluded_dir_paths
            .iter()
            .any(|excluded| entry.path().starts_with(excluded))
    }

    fn admits_file(&self, path: &Path, size_bytes: u64) -> bool {
        let ext = dotted_extension(path);
        if self.excluded_extensions.contains(&ext) {
            return false;
        }
        self.size_windows
            .get(&ext)
            .is_none_or(|window| window.admits(size_bytes))
    }

    /// Every admitted regular file, roots in configured order and each tree
    /// walked in file-name order.
    pub fn entries(&self) -> Vec<FileEntry> {
        let mut out = Vec::new();
        for root in &self.roots {
            if !root.exists() {
                warn!(root = %root.display(), "scan root does not exist; skipping");
                continue;
            }
            let root = absolutize(root);
            let walker = WalkDir::new(&root)
                .follow_links(self.follow_symlinks)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| !self.is_excluded_dir(entry));

            for item in walker {
                let entry = match item {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(error = %err, "skipping unreadable entry");
                        continue;
                    }
                };
                // Without follow_links a symlink reports its own type and is dropped here.
                if !entry.file_type().is_file() {
                    continue;
                }
                let size_bytes = match entry.metadata() {
                    Ok(meta) => meta.len(),
                    Err(err) => {
                        debug!(path = %entry.path().display(), error = %err, "stat failed");
                        continue;
                    }
                };
                if !self.admits_file(entry.path(), size_bytes) {
                    continue;
                }
                out.push(FileEntry {
                    path: entry.into_path(),
                    size_bytes,
                });
            }
        }
        out
    }
}
