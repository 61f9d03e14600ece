use crate::apply::types::{FailedStep, StepName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REBOOT_CONTEXT_VERSION: u32 = 1;

fn default_version() -> u32 {
    REBOOT_CONTEXT_VERSION
}

/// Checkpoint handed from the pre-reboot run to the post-reboot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootContext {
    #[serde(default = "default_version")]
    pub version: u32,
    pub bundle_root: PathBuf,
    /// Index of the next planned step to run, clamped to the last planned
    /// index when the reboot followed the final step.
    pub current_step_index: usize,
    pub completed_steps: Vec<StepName>,
    #[serde(default)]
    pub failed_steps: Vec<FailedStep>,
    #[serde(default)]
    pub planned_steps: Vec<StepName>,
    pub scheduled_at: DateTime<Utc>,
    pub reboot_count: u32,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl RebootContext {
    /// Invariants re-checked on every read: the checkpoint belongs to this
    /// bundle and only refers to steps the current plan contains.
    pub fn validate(&self, bundle_root: &Path, planned: &[StepName]) -> Result<(), String> {
        if self.version != REBOOT_CONTEXT_VERSION {
            return Err(format!(
                "unsupported checkpoint version {} (expected {REBOOT_CONTEXT_VERSION})",
                self.version
            ));
        }
        if self.bundle_root != bundle_root {
            return Err(format!(
                "checkpoint bundle root {} does not match requested bundle root {}",
                self.bundle_root.display(),
                bundle_root.display()
            ));
        }
        if planned.is_empty() {
            return Err("no steps are planned for this request".into());
        }
        if self.current_step_index >= planned.len() {
            return Err(format!(
                "checkpoint step index {} is outside the {} planned step(s)",
                self.current_step_index,
                planned.len()
            ));
        }
        if let Some(unknown) = self
            .completed_steps
            .iter()
            .find(|step| !planned.contains(*step))
        {
            return Err(format!(
                "completed step '{unknown}' is not part of the planned steps"
            ));
        }
        Ok(())
    }
}
