//! Apply orchestration: plan the configured steps for a bundle, run them in
//! order, survive reboots between them, and gate mission completion on step
//! results and the audit trail.

pub mod executor;
pub mod layout;
pub mod lock;
pub mod plan;
pub mod process;
pub mod runner;
pub mod summary;
pub mod templates;
pub mod types;

pub use layout::BundleLayout;
pub use plan::{ApplyPlan, PlannedStep};
pub use runner::{ApplyRunner, Collaborators};
pub use summary::read_latest_summary;
pub use types::{
    ApplyRequest, ApplyResult, ApplyStepOutcome, ContinuityMarker, HardeningMode, StepName,
    StepVerbosity,
};
