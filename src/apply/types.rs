use crate::convergence::ConvergenceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable identifier of an apply step. Declaration order is execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepName {
    PolicyCompile,
    Script,
    DeclarativeApply,
    TemplateImport,
    LocalPolicyApply,
}

impl StepName {
    pub const ORDER: [Self; 5] = [
        Self::PolicyCompile,
        Self::Script,
        Self::DeclarativeApply,
        Self::TemplateImport,
        Self::LocalPolicyApply,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PolicyCompile => "policy-compile",
            Self::Script => "script",
            Self::DeclarativeApply => "declarative-apply",
            Self::TemplateImport => "template-import",
            Self::LocalPolicyApply => "local-policy-apply",
        }
    }

    /// Steps that mutate host configuration and may leave a reboot pending.
    pub const fn may_require_reboot(self) -> bool {
        matches!(
            self,
            Self::Script | Self::DeclarativeApply | Self::LocalPolicyApply
        )
    }
}

/// How aggressively configuration changes are applied.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum HardeningMode {
    #[strum(to_string = "audit-only", serialize = "audit_only", serialize = "auditonly")]
    AuditOnly,
    #[default]
    Safe,
    Full,
}

/// Per-step verbosity; a verbose step gets `STIGAPPLY_VERBOSE=1` and its
/// captured output echoed at debug level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepVerbosity {
    pub policy_compile: bool,
    pub script: bool,
    pub declarative_apply: bool,
    pub local_policy_apply: bool,
}

impl StepVerbosity {
    pub const fn for_step(self, step: StepName) -> bool {
        match step {
            StepName::PolicyCompile => self.policy_compile,
            StepName::Script => self.script,
            StepName::DeclarativeApply => self.declarative_apply,
            StepName::LocalPolicyApply => self.local_policy_apply,
            StepName::TemplateImport => false,
        }
    }
}

/// One apply attempt's input. Built by the caller and never mutated.
#[derive(Debug, Clone, Default)]
pub struct ApplyRequest {
    pub bundle_root: PathBuf,
    pub mode_override: Option<HardeningMode>,
    pub script_path: Option<PathBuf>,
    pub dsc_manifest_path: Option<PathBuf>,
    pub policy_module_path: Option<PathBuf>,
    pub policy_data_path: Option<PathBuf>,
    pub policy_output_path: Option<PathBuf>,
    pub template_root: Option<PathBuf>,
    pub local_policy_path: Option<PathBuf>,
    pub verbosity: StepVerbosity,
    pub skip_snapshot: bool,
    /// Reset the configuration manager to its captured state after the
    /// steps ran. `None` defers to `[apply] restore_configuration_manager`.
    pub restore_configuration_manager: Option<bool>,
    pub run_id: Option<String>,
    pub prior_run_id: Option<String>,
}

impl ApplyRequest {
    pub fn new(bundle_root: impl Into<PathBuf>) -> Self {
        Self {
            bundle_root: bundle_root.into(),
            ..Self::default()
        }
    }
}

/// Whether a step's artifact matches the same step of the named prior run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContinuityMarker {
    Retained,
    Superseded,
}

/// Result of one executed step. Failures live here as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyStepOutcome {
    pub step: StepName,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub stdout_path: Option<PathBuf>,
    #[serde(default)]
    pub stderr_path: Option<PathBuf>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub evidence_metadata_path: Option<PathBuf>,
    #[serde(default)]
    pub artifact_hash: Option<String>,
    #[serde(default)]
    pub continuity: Option<ContinuityMarker>,
}

impl ApplyStepOutcome {
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// A failed step remembered across a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    pub step: StepName,
    pub exit_code: i32,
}

/// Output of one apply attempt; also the persisted run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub run_id: String,
    #[serde(default)]
    pub prior_run_id: Option<String>,
    pub bundle_root: PathBuf,
    pub mode: HardeningMode,
    pub log_path: PathBuf,
    pub steps: Vec<ApplyStepOutcome>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub rollback_script: Option<PathBuf>,
    pub is_mission_complete: bool,
    pub integrity_verified: bool,
    #[serde(default)]
    pub blocking_failures: Vec<String>,
    #[serde(default)]
    pub recovery_artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub reboot_count: u32,
    #[serde(default)]
    pub reboot_pending: bool,
    /// Steps completed by an earlier attempt before the reboot this run resumed from.
    #[serde(default)]
    pub resumed_steps: Vec<StepName>,
    /// Outcomes of `resumed_steps` as recorded by the attempt(s) before the reboot.
    #[serde(default)]
    pub resumed_outcomes: Vec<ApplyStepOutcome>,
    /// Steps that were planned but intentionally not executed.
    #[serde(default)]
    pub skipped_steps: Vec<StepName>,
    pub convergence: ConvergenceStatus,
    /// Audit-trail link hash recorded by the last run whose audit verified.
    /// The next run requires the trail to still contain it.
    #[serde(default)]
    pub audit_head: Option<String>,
}

impl ApplyResult {
    pub fn outcome(&self, step: StepName) -> Option<&ApplyStepOutcome> {
        self.steps.iter().find(|outcome| outcome.step == step)
    }

    /// Outcome of `step` for the whole apply, including steps that ran
    /// before a reboot this attempt resumed from.
    pub fn full_outcome(&self, step: StepName) -> Option<&ApplyStepOutcome> {
        self.outcome(step).or_else(|| {
            self.resumed_outcomes
                .iter()
                .find(|outcome| outcome.step == step)
        })
    }
}
