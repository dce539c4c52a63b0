//! Apply State Machine
//!
//! Tracks one update attempt from fetch to commit. The target executable is
//! only touched in `Swapping`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Phase of an update attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ApplyPhase {
    Idle,
    Fetching,
    Verifying,
    Staging,
    Swapping,
    Committed,
    /// Target restored from backup after a failed swap
    RolledBack { reason: String },
    /// Swap failed and so did the restore; the backup path is the recovery handle
    FatalRollbackFailure { reason: String },
}

impl Default for ApplyPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Client-local state of one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyState {
    pub target: PathBuf,
    pub staging_path: PathBuf,
    pub backup_path: PathBuf,
    pub phase: ApplyPhase,
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}", name, suffix))
}

/// `.<exe>.new` next to the target
pub fn staging_path(target: &Path) -> PathBuf {
    sibling(target, "new")
}

/// `.<exe>.old` next to the target
pub fn backup_path(target: &Path) -> PathBuf {
    sibling(target, "old")
}

/// `.<exe>.lock` next to the target
pub fn lock_path(target: &Path) -> PathBuf {
    sibling(target, "lock")
}

impl ApplyState {
    pub fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            staging_path: staging_path(target),
            backup_path: backup_path(target),
            phase: ApplyPhase::Idle,
        }
    }

    pub fn start_fetching(&mut self) {
        self.phase = ApplyPhase::Fetching;
    }

    pub fn start_verifying(&mut self) {
        self.phase = ApplyPhase::Verifying;
    }

    pub fn start_staging(&mut self) {
        self.phase = ApplyPhase::Staging;
    }

    pub fn start_swapping(&mut self) {
        self.phase = ApplyPhase::Swapping;
    }

    pub fn commit(&mut self) {
        self.phase = ApplyPhase::Committed;
    }

    pub fn mark_rolled_back(&mut self, reason: String) {
        self.phase = ApplyPhase::RolledBack { reason };
    }

    pub fn mark_fatal(&mut self, reason: String) {
        self.phase = ApplyPhase::FatalRollbackFailure { reason };
    }

    /// Whether the target may have been modified
    pub fn touched_target(&self) -> bool {
        matches!(
            self.phase,
            ApplyPhase::Swapping
                | ApplyPhase::Committed
                | ApplyPhase::RolledBack { .. }
                | ApplyPhase::FatalRollbackFailure { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            ApplyPhase::Committed
                | ApplyPhase::RolledBack { .. }
                | ApplyPhase::FatalRollbackFailure { .. }
        )
    }
}
