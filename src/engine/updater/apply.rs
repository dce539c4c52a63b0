//! Atomic Self-Replacement
//!
//! New bytes are staged next to the target, the target is renamed to a
//! backup, and the staged file is renamed into place. Any failure after the
//! first rename restores the backup.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::state::{backup_path, staging_path, ApplyState};

#[derive(Error, Debug)]
pub enum ApplyError {
    /// Nothing outside the staging file was touched
    #[error("Failed to stage {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The swap failed and the original executable is back in place
    #[error("Swap failed, rolled back: {source}")]
    Swap {
        #[source]
        source: io::Error,
    },
    /// The swap failed and restoring the original failed too
    #[error("Swap failed ({swap}) and rollback failed ({rollback}); original executable is at {}", backup.display())]
    RollbackFailure {
        backup: PathBuf,
        swap: io::Error,
        rollback: io::Error,
    },
    #[error("Recovery of {} failed: {source}", path.display())]
    Recovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystem operations the swap depends on
pub trait FileOps: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn sync_dir(&self, dir: &Path) -> io::Result<()>;
}

pub struct OsFileOps;

impl FileOps for OsFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn sync_dir(&self, dir: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            File::open(dir)?.sync_all()
        }
        #[cfg(not(unix))]
        {
            let _ = dir;
            Ok(())
        }
    }
}

/// Result of the startup check for an interrupted swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Clean,
    /// Target was missing and has been restored from the backup
    RestoredBackup,
    RemovedStaleStaging,
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

pub struct AtomicApplier<F: FileOps = OsFileOps> {
    ops: F,
    keep_backup: bool,
}

impl AtomicApplier<OsFileOps> {
    pub fn new(keep_backup: bool) -> Self {
        Self::with_ops(OsFileOps, keep_backup)
    }
}

impl<F: FileOps> AtomicApplier<F> {
    pub fn with_ops(ops: F, keep_backup: bool) -> Self {
        Self { ops, keep_backup }
    }

    /// Undo what an interrupted earlier attempt left behind
    pub fn recover(&self, target: &Path) -> Result<Recovery, ApplyError> {
        let backup = backup_path(target);
        let staging = staging_path(target);
        let mut outcome = Recovery::Clean;

        if !target.exists() && backup.exists() {
            warn!(
                "{} is missing, restoring {}",
                target.display(),
                backup.display()
            );
            self.ops
                .rename(&backup, target)
                .map_err(|source| ApplyError::Recovery {
                    path: backup.clone(),
                    source,
                })?;
            outcome = Recovery::RestoredBackup;
        }

        let removed = remove_if_exists(&staging).map_err(|source| ApplyError::Recovery {
            path: staging.clone(),
            source,
        })?;
        if removed {
            debug!("Removed stale {}", staging.display());
            if outcome == Recovery::Clean {
                outcome = Recovery::RemovedStaleStaging;
            }
        }
        Ok(outcome)
    }

    fn stage(&self, state: &ApplyState, content: &[u8]) -> Result<(), ApplyError> {
        let staging = &state.staging_path;
        let staging_err = |source| ApplyError::Staging {
            path: staging.clone(),
            source,
        };

        let permissions = fs::metadata(&state.target)
            .map_err(|source| ApplyError::Staging {
                path: state.target.clone(),
                source,
            })?
            .permissions();

        remove_if_exists(staging).map_err(staging_err)?;
        remove_if_exists(&state.backup_path).map_err(|source| ApplyError::Staging {
            path: state.backup_path.clone(),
            source,
        })?;

        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(staging)
            .and_then(|mut file| {
                file.write_all(content)?;
                fs::set_permissions(staging, permissions)?;
                file.sync_all()
            });

        if let Err(source) = written {
            let _ = fs::remove_file(staging);
            return Err(staging_err(source));
        }
        debug!("Staged {} bytes at {}", content.len(), staging.display());
        Ok(())
    }

    /// Replace `state.target` with `content`
    pub fn apply(&self, state: &mut ApplyState, content: &[u8]) -> Result<(), ApplyError> {
        state.start_staging();
        self.stage(state, content)?;

        state.start_swapping();
        if let Err(source) = self.ops.rename(&state.target, &state.backup_path) {
            let _ = fs::remove_file(&state.staging_path);
            state.mark_rolled_back(source.to_string());
            return Err(ApplyError::Swap { source });
        }

        if let Err(swap) = self.ops.rename(&state.staging_path, &state.target) {
            if let Err(rollback) = self.ops.rename(&state.backup_path, &state.target) {
                error!(
                    "Rollback of {} failed, original executable left at {}: {}",
                    state.target.display(),
                    state.backup_path.display(),
                    rollback
                );
                state.mark_fatal(format!("swap: {}; rollback: {}", swap, rollback));
                return Err(ApplyError::RollbackFailure {
                    backup: state.backup_path.clone(),
                    swap,
                    rollback,
                });
            }
            let _ = fs::remove_file(&state.staging_path);
            warn!("Swap of {} failed, rolled back: {}", state.target.display(), swap);
            state.mark_rolled_back(swap.to_string());
            return Err(ApplyError::Swap { source: swap });
        }

        if let Some(dir) = state.target.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = self.ops.sync_dir(dir) {
                warn!("Failed to sync {}: {}", dir.display(), e);
            }
        }

        state.commit();
        info!("Replaced {}", state.target.display());

        if !self.keep_backup {
            if let Err(e) = fs::remove_file(&state.backup_path) {
                warn!("Failed to remove {}: {}", state.backup_path.display(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::state::ApplyPhase;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Fails the renames whose 1-based call numbers are listed
    struct FailingOps {
        fail_on: Vec<usize>,
        calls: AtomicUsize,
    }

    impl FailingOps {
        fn new(fail_on: &[usize]) -> Self {
            Self {
                fail_on: fail_on.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FileOps for FailingOps {
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                return Err(io::Error::other(format!("injected failure on rename {}", call)));
            }
            fs::rename(from, to)
        }

        fn sync_dir(&self, _dir: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    fn target_with(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let target = dir.path().join("tool");
        fs::write(&target, content).unwrap();
        (dir, target)
    }

    #[test]
    fn test_apply_replaces_target() {
        let (_dir, target) = target_with(b"old build");
        let mut state = ApplyState::new(&target);

        AtomicApplier::new(false).apply(&mut state, b"new build").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new build");
        assert_eq!(state.phase, ApplyPhase::Committed);
        assert!(!state.backup_path.exists());
        assert!(!state.staging_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, target) = target_with(b"old");
        fs::set_permissions(&target, fs::Permissions::from_mode(0o751)).unwrap();
        let mut state = ApplyState::new(&target);

        AtomicApplier::new(false).apply(&mut state, b"new").unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o751);
    }

    #[test]
    fn test_keep_backup() {
        let (_dir, target) = target_with(b"old build");
        let mut state = ApplyState::new(&target);

        AtomicApplier::new(true).apply(&mut state, b"new build").unwrap();

        assert_eq!(fs::read(&state.backup_path).unwrap(), b"old build");
        // a second update replaces the stale backup
        let mut state = ApplyState::new(&target);
        AtomicApplier::new(true).apply(&mut state, b"newer build").unwrap();
        assert_eq!(fs::read(&state.backup_path).unwrap(), b"new build");
    }

    #[test]
    fn test_first_rename_failure_leaves_target() {
        let (_dir, target) = target_with(b"original");
        let mut state = ApplyState::new(&target);
        let applier = AtomicApplier::with_ops(FailingOps::new(&[1]), false);

        let result = applier.apply(&mut state, b"replacement");

        assert!(matches!(result, Err(ApplyError::Swap { .. })));
        assert!(matches!(state.phase, ApplyPhase::RolledBack { .. }));
        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert!(!state.staging_path.exists());
    }

    #[test]
    fn test_second_rename_failure_rolls_back_exactly() {
        let original: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let (_dir, target) = target_with(&original);
        let mut state = ApplyState::new(&target);
        let applier = AtomicApplier::with_ops(FailingOps::new(&[2]), false);

        let result = applier.apply(&mut state, b"replacement");

        assert!(matches!(result, Err(ApplyError::Swap { .. })));
        assert!(matches!(state.phase, ApplyPhase::RolledBack { .. }));
        assert_eq!(fs::read(&target).unwrap(), original);
        assert!(!state.backup_path.exists());
        assert!(!state.staging_path.exists());
    }

    #[test]
    fn test_failed_rollback_is_distinct() {
        let (_dir, target) = target_with(b"original");
        let mut state = ApplyState::new(&target);
        let applier = AtomicApplier::with_ops(FailingOps::new(&[2, 3]), false);

        let result = applier.apply(&mut state, b"replacement");

        match result {
            Err(ApplyError::RollbackFailure { backup, .. }) => {
                assert_eq!(fs::read(backup).unwrap(), b"original");
            }
            other => panic!("expected rollback failure, got {:?}", other),
        }
        assert!(matches!(state.phase, ApplyPhase::FatalRollbackFailure { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn test_missing_target_fails_staging() {
        let dir = tempdir().unwrap();
        let mut state = ApplyState::new(&dir.path().join("absent"));
        let result = AtomicApplier::new(false).apply(&mut state, b"data");
        assert!(matches!(result, Err(ApplyError::Staging { .. })));
        assert!(!state.touched_target());
    }

    #[test]
    fn test_stale_staging_is_replaced() {
        let (_dir, target) = target_with(b"old");
        let mut state = ApplyState::new(&target);
        fs::write(&state.staging_path, b"leftover from a crash").unwrap();

        AtomicApplier::new(false).apply(&mut state, b"new").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_recover_restores_backup() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("tool");
        fs::write(backup_path(&target), b"previous").unwrap();
        fs::write(staging_path(&target), b"half written").unwrap();

        let applier = AtomicApplier::new(false);
        assert_eq!(applier.recover(&target).unwrap(), Recovery::RestoredBackup);
        assert_eq!(fs::read(&target).unwrap(), b"previous");
        assert!(!staging_path(&target).exists());

        assert_eq!(applier.recover(&target).unwrap(), Recovery::Clean);
    }

    #[test]
    fn test_recover_leaves_present_target() {
        let (_dir, target) = target_with(b"current");
        fs::write(backup_path(&target), b"kept backup").unwrap();
        fs::write(staging_path(&target), b"stale").unwrap();

        let applier = AtomicApplier::new(true);
        assert_eq!(applier.recover(&target).unwrap(), Recovery::RemovedStaleStaging);
        assert_eq!(fs::read(&target).unwrap(), b"current");
        assert!(backup_path(&target).exists());
    }
}
