//! Per-target Update Lock
//!
//! `.<exe>.lock` next to the target keeps one update attempt in flight.
//! The file is created exclusively and records who holds it, so a lock
//! left by a dead process can be reclaimed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::state::lock_path;

/// Contents of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub target: PathBuf,
}

impl LockInfo {
    fn current(target: &Path) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            target: target.to_path_buf(),
        }
    }

    /// Check if the process that created the lock is still running
    pub fn is_process_alive(&self) -> bool {
        if self.pid == std::process::id() {
            return true;
        }
        #[cfg(unix)]
        {
            use std::process::Command;
            Command::new("kill")
                .args(["-0", &self.pid.to_string()])
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        }

        #[cfg(windows)]
        {
            use std::process::Command;
            Command::new("tasklist")
                .args(["/FI", &format!("PID eq {}", self.pid)])
                .output()
                .map(|o| String::from_utf8_lossy(&o.stdout).contains(&self.pid.to_string()))
                .unwrap_or(false)
        }

        #[cfg(not(any(unix, windows)))]
        true
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Update of {} already in progress (PID {pid}, since {started_at})", target.display())]
    AlreadyLocked {
        target: PathBuf,
        pid: u32,
        started_at: DateTime<Utc>,
    },
    /// Another process recreated the lock while a stale one was being
    /// reclaimed, and has not written its details yet
    #[error("Update of {} already in progress (lock {} just taken)", target.display(), path.display())]
    Contended { target: PathBuf, path: PathBuf },
    #[error("Lock file {} error: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// RAII guard that releases the lock on drop
#[derive(Debug)]
pub struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    pub fn acquire(target: &Path) -> Result<Self, LockError> {
        let path = lock_path(target);
        match Self::create(&path, target) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            other => {
                return other
                    .map(|()| Self { path: path.clone() })
                    .map_err(|source| LockError::Io { path, source })
            }
        }

        // Unreadable or unparsable lock files are treated as stale
        if let Some(info) = read_info(&path) {
            if info.is_process_alive() {
                return Err(LockError::AlreadyLocked {
                    target: target.to_path_buf(),
                    pid: info.pid,
                    started_at: info.started_at,
                });
            }
        }

        warn!("Reclaiming stale lock {}", path.display());
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(LockError::Io { path, source }),
        }
        // another process may win the race after the removal; exclusive create decides
        match Self::create(&path, target) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(held_by(&path, target)),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    fn create(path: &Path, target: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let content = serde_json::to_string_pretty(&LockInfo::current(target))
            .map_err(io::Error::other)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        debug!("Acquired {}", path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
}

/// Error for a lock that another process holds right now
fn held_by(path: &Path, target: &Path) -> LockError {
    match read_info(path) {
        Some(info) => LockError::AlreadyLocked {
            target: target.to_path_buf(),
            pid: info.pid,
            started_at: info.started_at,
        },
        None => LockError::Contended {
            target: target.to_path_buf(),
            path: path.to_path_buf(),
        },
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_release() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("tool");

        let guard = UpdateLock::acquire(&target).unwrap();
        assert!(guard.path().exists());

        // Can't acquire the same target twice
        assert!(matches!(
            UpdateLock::acquire(&target),
            Err(LockError::AlreadyLocked { .. })
        ));

        drop(guard);
        assert!(!lock_path(&target).exists());

        // Can acquire after release
        assert!(UpdateLock::acquire(&target).is_ok());
    }

    #[test]
    fn test_separate_targets_independent() {
        let dir = tempdir().unwrap();
        let _a = UpdateLock::acquire(&dir.path().join("a")).unwrap();
        assert!(UpdateLock::acquire(&dir.path().join("b")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_reclaimed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("tool");

        // a pid that has exited
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        let stale = LockInfo {
            pid: dead_pid,
            started_at: Utc::now(),
            target: target.clone(),
        };
        fs::write(lock_path(&target), serde_json::to_string(&stale).unwrap()).unwrap();

        let guard = UpdateLock::acquire(&target).unwrap();
        let info: LockInfo =
            serde_json::from_str(&fs::read_to_string(guard.path()).unwrap()).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn test_lost_reclaim_reports_winner() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("tool");
        let path = lock_path(&target);

        let winner = LockInfo {
            pid: 4242,
            started_at: Utc::now(),
            target: target.clone(),
        };
        fs::write(&path, serde_json::to_string(&winner).unwrap()).unwrap();
        match held_by(&path, &target) {
            LockError::AlreadyLocked {
                pid, started_at, ..
            } => {
                assert_eq!(pid, 4242);
                assert_eq!(started_at, winner.started_at);
            }
            other => panic!("unexpected {:?}", other),
        }

        // winner created the file but has not written it yet
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            held_by(&path, &target),
            LockError::Contended { .. }
        ));
    }

    #[test]
    fn test_garbage_lock_reclaimed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("tool");
        fs::write(lock_path(&target), b"not json").unwrap();
        assert!(UpdateLock::acquire(&target).is_ok());
    }
}
