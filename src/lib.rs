#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod apply;
pub mod collaborators;
pub mod config;
pub mod convergence;
pub mod error;
pub mod evidence;
pub mod fallback;
pub mod idempotency;
pub mod observability;
pub mod preflight;
pub mod reboot;
#[doc(hidden)]
pub mod util;

pub use apply::{ApplyRequest, ApplyResult, ApplyRunner, Collaborators};
pub use config::Config;
pub use error::{ApplyError, Result};
