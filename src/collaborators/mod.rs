//! Contracts the apply engine consumes from its collaborators, plus the
//! file-backed implementations the CLI wires in by default.

pub mod audit;
pub mod lcm;
pub mod snapshot;

pub use audit::{AuditEntry, AuditTrail, FileAuditTrail};
pub use lcm::{
    ApplyConfiguration, ConfigurationManager, ConfigurationState, InMemoryConfigurationManager,
};
pub use snapshot::{FileSnapshotService, SnapshotInfo, SnapshotService};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by collaborator trait methods.
pub type CollabFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
