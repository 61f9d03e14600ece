pub mod schema;

pub use schema::{
    ApplyConfig, Config, ObservabilityConfig, PreflightConfig, RebootConfig, StepLauncher,
    StepLaunchers, StepTimeouts,
};
