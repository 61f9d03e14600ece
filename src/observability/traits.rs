use crate::apply::types::StepName;
use std::time::Duration;

/// Events the apply engine reports while a run progresses
#[derive(Debug, Clone)]
pub enum ApplyEvent {
    RunStarted {
        run_id: String,
        bundle_root: String,
        mode: String,
        planned: usize,
    },
    StepStarted {
        run_id: String,
        step: StepName,
    },
    StepFinished {
        run_id: String,
        step: StepName,
        exit_code: i32,
        duration: Duration,
        timed_out: bool,
    },
    StepSkipped {
        run_id: String,
        step: StepName,
        reason: String,
    },
    RebootScheduled {
        run_id: String,
        next_step: StepName,
        reboot_count: u32,
    },
    RunFinished {
        run_id: String,
        convergence: String,
        mission_complete: bool,
        blocking_failures: usize,
    },
    Error {
        component: String,
        message: String,
    },
}

/// Sink for apply lifecycle events.
pub trait ApplyObserver: Send + Sync {
    /// Record a discrete event
    fn record_event(&self, event: &ApplyEvent);

    /// Flush any buffered data (no-op for most backends)
    fn flush(&self) {}

    /// Human-readable name of this observer
    fn name(&self) -> &str;
}
