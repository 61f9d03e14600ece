use crate::apply::types::{ApplyStepOutcome, FailedStep};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Reboots a single bundle may go through before its convergence is reported
/// as `Exceeded`. Scheduling is never refused; only the status changes.
pub const MAX_REBOOT_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    NotApplicable,
    Converged,
    Diverged,
    Exceeded,
}

#[derive(Debug, Clone, Copy)]
pub struct ConvergenceInput {
    pub step_count: usize,
    pub any_step_failed: bool,
    pub reboot_pending: bool,
    pub reboot_count: u32,
    pub max_reboot_count: u32,
}

pub const fn classify(input: ConvergenceInput) -> ConvergenceStatus {
    if input.step_count == 0 {
        return ConvergenceStatus::NotApplicable;
    }
    if !input.reboot_pending && !input.any_step_failed {
        return ConvergenceStatus::Converged;
    }
    if input.reboot_count >= input.max_reboot_count {
        return ConvergenceStatus::Exceeded;
    }
    ConvergenceStatus::Diverged
}

/// What happened when the run consulted the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditStatus {
    Verified,
    Unavailable,
    RecordFailed(String),
    IntegrityFailed,
    VerifyFailed(String),
}

impl AuditStatus {
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// One message per failing step (this attempt and before any reboot), plus
/// one for any audit-trail problem.
pub fn collect_blocking_failures(
    outcomes: &[ApplyStepOutcome],
    carried: &[FailedStep],
    audit: &AuditStatus,
) -> Vec<String> {
    let mut failures: Vec<String> = carried
        .iter()
        .map(|failed| {
            format!(
                "step '{}' exited with code {} (before reboot)",
                failed.step, failed.exit_code
            )
        })
        .collect();

    for outcome in outcomes.iter().filter(|outcome| !outcome.succeeded()) {
        let mut message = format!(
            "step '{}' exited with code {}",
            outcome.step, outcome.exit_code
        );
        if let Some(error) = &outcome.error {
            message.push_str(": ");
            message.push_str(error);
        }
        failures.push(message);
    }

    match audit {
        AuditStatus::Verified => {}
        AuditStatus::Unavailable => {
            failures.push("audit trail unavailable; apply evidence cannot be verified".into());
        }
        AuditStatus::RecordFailed(error) => {
            failures.push(format!("audit trail entry could not be recorded: {error}"));
        }
        AuditStatus::IntegrityFailed => {
            failures.push("audit trail integrity check failed".into());
        }
        AuditStatus::VerifyFailed(error) => {
            failures.push(format!("audit trail integrity check errored: {error}"));
        }
    }

    failures
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryArtifact {
    pub label: &'static str,
    pub path: PathBuf,
}

impl RecoveryArtifact {
    pub fn new(label: &'static str, path: impl AsRef<Path>) -> Self {
        Self {
            label,
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Self-contained operator message for a blocked run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingFailureReport {
    pub run_id: String,
    pub bundle_root: PathBuf,
    pub failures: Vec<String>,
    pub recovery_artifacts: Vec<RecoveryArtifact>,
    pub snapshot_taken: bool,
}

impl fmt::Display for BlockingFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "apply run {} for {} is blocked with {} blocking failure(s); mission completion was not reported.",
            self.run_id,
            self.bundle_root.display(),
            self.failures.len()
        )?;
        writeln!(f, "Blocking failures:")?;
        for failure in &self.failures {
            writeln!(f, "  - {failure}")?;
        }
        writeln!(f, "Recovery artifacts:")?;
        for artifact in &self.recovery_artifacts {
            writeln!(f, "  - {}: {}", artifact.label, artifact.path.display())?;
        }
        if !self.snapshot_taken {
            writeln!(
                f,
                "  - no pre-apply snapshot was taken (snapshot skipped by request)"
            )?;
        }
        write!(
            f,
            "Rollback is never automatic: review the artifacts above and initiate rollback manually if required."
        )
    }
}
