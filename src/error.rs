use crate::apply::types::{ApplyResult, StepName};
use crate::convergence::BlockingFailureReport;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Everything an apply attempt may raise.
///
/// Step failures (non-zero exit, timeout) are never represented here; they
/// are captured on [`crate::apply::types::ApplyStepOutcome`]. Only
/// preconditions, resume integrity and the final blocking gate abort a run.
#[derive(Debug, Error)]
pub enum ApplyError {
    // ── Preconditions ───────────────────────────────────────────────────
    #[error("bundle root does not exist or is not a directory: {}", .0.display())]
    BundleRootMissing(PathBuf),

    #[error("invalid apply request: {0}")]
    InvalidRequest(String),

    #[error("{}", locked_message(.lock_path, .stale.as_deref()))]
    BundleLocked {
        lock_path: PathBuf,
        /// Set when the recorded holder is known not to be running.
        stale: Option<String>,
    },

    // ── Resume integrity ────────────────────────────────────────────────
    #[error(
        "resume context invalid or exhausted: {reason}. Automatic continuation is blocked pending an operator decision; checkpoint retained at {}",
        .checkpoint_path.display()
    )]
    ResumeInvalid {
        reason: String,
        checkpoint_path: PathBuf,
    },

    // ── Collaborator preconditions ──────────────────────────────────────
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("configuration manager: {0}")]
    ConfigurationManager(#[from] ConfigManagerError),

    // ── Blocking gate ───────────────────────────────────────────────────
    #[error("{report}")]
    Blocked {
        report: BlockingFailureReport,
        result: Box<ApplyResult>,
    },

    #[error("apply run cancelled before {} step(s) ran: {}", .remaining.len(), join_steps(.remaining))]
    Cancelled { remaining: Vec<StepName> },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn locked_message(lock_path: &Path, stale: Option<&str>) -> String {
    match stale {
        Some(reason) => format!(
            "bundle lock {} is stale ({reason}); remove it to let a new apply attempt start",
            lock_path.display()
        ),
        None => format!(
            "bundle is locked by another apply attempt ({}); remove the lock only after confirming no run is in flight",
            lock_path.display()
        ),
    }
}

fn join_steps(steps: &[StepName]) -> String {
    steps
        .iter()
        .map(|step| step.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Snapshot collaborator errors ────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to create snapshot in {}: {message}", .dir.display())]
    Create { dir: PathBuf, message: String },

    #[error("failed to generate rollback script for snapshot {snapshot_id}: {message}")]
    RollbackScript {
        snapshot_id: String,
        message: String,
    },
}

// ─── Configuration-manager collaborator errors ───────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigManagerError {
    #[error("failed to read state: {0}")]
    State(String),

    #[error("failed to configure for apply: {0}")]
    Configure(String),

    #[error("failed to reset state: {0}")]
    Reset(String),
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ApplyError>;
