mod apply;
mod core;
mod observability;
mod preflight;
mod reboot;

pub use apply::{ApplyConfig, StepLauncher, StepLaunchers, StepTimeouts};
pub use core::Config;
pub use observability::ObservabilityConfig;
pub use preflight::PreflightConfig;
pub use reboot::RebootConfig;
