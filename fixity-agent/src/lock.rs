use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{AgentError, Result};

/// Exclusive-create lock file held for the lifetime of a run or daemon.
/// The file is removed when the guard drops.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

/// `<state_path>.lock`
pub fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut name = state_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Accepts `pid=<n>` and the bare `<n>` older agents wrote.
fn parse_pid(contents: &str) -> Option<u32> {
    let line = contents.lines().next()?.trim();
    line.strip_prefix("pid=").unwrap_or(line).trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).ok().as_deref().and_then(parse_pid);
                match holder {
                    Some(pid) if !process_alive(pid) => {
                        warn!(lock = %path.display(), pid, "removing stale lock left by a dead process");
                        fs::remove_file(path)?;
                        Self::create(path).map_err(|err| match err.kind() {
                            io::ErrorKind::AlreadyExists => AgentError::Lock {
                                path: path.to_path_buf(),
                                pid: None,
                            },
                            _ => err.into(),
                        })
                    }
                    pid => Err(AgentError::Lock {
                        path: path.to_path_buf(),
                        pid,
                    }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "pid={}", std::process::id())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(lock = %self.path.display(), error = %err, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/var/lib/fixity/state.json")),
            PathBuf::from("/var/lib/fixity/state.json.lock")
        );
    }

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json.lock");

        let first = InstanceLock::acquire(&path).expect("first lock");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(parse_pid(&contents), Some(std::process::id()));

        match InstanceLock::acquire(&path) {
            Err(AgentError::Lock { pid, .. }) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected lock error, got {other:?}"),
        }

        drop(first);
        assert!(!path.exists());
        let _again = InstanceLock::acquire(&path).expect("reacquire");
    }

    #[test]
    fn unreadable_holder_is_not_presumed_dead() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x.lock");
        fs::write(&path, "garbage").expect("write");
        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(AgentError::Lock { pid: None, .. })
        ));
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_from_dead_pid_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x.lock");
        // Above any Linux pid_max.
        fs::write(&path, "pid=999999999\n").expect("write");

        let lock = InstanceLock::acquire(&path).expect("stale lock replaced");
        let contents = fs::read_to_string(lock.path()).expect("read");
        assert_eq!(parse_pid(&contents), Some(std::process::id()));
    }

    #[test]
    fn pid_formats() {
        assert_eq!(parse_pid("pid=42\n"), Some(42));
        assert_eq!(parse_pid("42\n"), Some(42));
        assert_eq!(parse_pid(""), None);
    }
}
