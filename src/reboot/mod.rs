//! Reboot checkpoint and resume.
//!
//! Two observable states: `Idle` (no checkpoint on disk) and `PendingResume`
//! (checkpoint present). The checkpoint is the only state shared between
//! the pre-reboot and post-reboot process, so every read re-validates it.

pub mod context;
pub mod probe;

pub use context::{REBOOT_CONTEXT_VERSION, RebootContext};
pub use probe::{FlagFileRebootProbe, RebootProbe};

use crate::apply::types::StepName;
use crate::error::ApplyError;
use crate::util::write_json_atomic;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    PendingResume,
}

pub struct RebootCoordinator {
    checkpoint_path: PathBuf,
    probe: Arc<dyn RebootProbe>,
}

impl RebootCoordinator {
    pub fn new(checkpoint_path: impl Into<PathBuf>, probe: Arc<dyn RebootProbe>) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            probe,
        }
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn state(&self) -> CoordinatorState {
        if self.checkpoint_path.exists() {
            CoordinatorState::PendingResume
        } else {
            CoordinatorState::Idle
        }
    }

    pub fn detect_reboot_required(&self) -> bool {
        self.probe.reboot_required()
    }

    /// Idle → PendingResume.
    pub fn schedule_reboot(&self, context: &RebootContext) -> anyhow::Result<()> {
        write_json_atomic(&self.checkpoint_path, context).with_context(|| {
            format!(
                "failed persisting reboot checkpoint: {}",
                self.checkpoint_path.display()
            )
        })?;
        tracing::info!(
            checkpoint = %self.checkpoint_path.display(),
            next_step_index = context.current_step_index,
            reboot_count = context.reboot_count,
            "reboot.scheduled"
        );
        Ok(())
    }

    /// PendingResume → Idle. Returns `None` when there is nothing to resume.
    ///
    /// An unreadable or invalid checkpoint is left in place and reported as
    /// [`ApplyError::ResumeInvalid`]; it is never repaired or discarded here.
    pub fn resume_after_reboot(
        &self,
        bundle_root: &Path,
        planned: &[StepName],
    ) -> Result<Option<RebootContext>, ApplyError> {
        if self.state() == CoordinatorState::Idle {
            return Ok(None);
        }

        let invalid = |reason: String| ApplyError::ResumeInvalid {
            reason,
            checkpoint_path: self.checkpoint_path.clone(),
        };

        let raw = std::fs::read_to_string(&self.checkpoint_path)
            .map_err(|error| invalid(format!("checkpoint unreadable: {error}")))?;
        let context: RebootContext = serde_json::from_str(&raw)
            .map_err(|error| invalid(format!("checkpoint malformed: {error}")))?;
        context.validate(bundle_root, planned).map_err(invalid)?;

        std::fs::remove_file(&self.checkpoint_path).with_context(|| {
            format!(
                "failed consuming reboot checkpoint: {}",
                self.checkpoint_path.display()
            )
        })?;

        tracing::info!(
            completed = context.completed_steps.len(),
            reboot_count = context.reboot_count,
            "reboot.resumed"
        );
        Ok(Some(context))
    }
}
