use super::traits::{ApplyEvent, ApplyObserver};
use tracing::{info, warn};

/// Forwards apply events to `tracing` with structured fields.
pub struct LogObserver;

impl LogObserver {
    pub const fn new() -> Self {
        Self
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ApplyObserver for LogObserver {
    fn record_event(&self, event: &ApplyEvent) {
        match event {
            ApplyEvent::RunStarted {
                run_id,
                bundle_root,
                mode,
                planned,
            } => {
                info!(run_id = %run_id, bundle = %bundle_root, mode = %mode, planned = planned, "run.start");
            }
            ApplyEvent::StepStarted { run_id, step } => {
                info!(run_id = %run_id, step = %step, "step.start");
            }
            ApplyEvent::StepFinished {
                run_id,
                step,
                exit_code,
                duration,
                timed_out,
            } => {
                info!(
                    run_id = %run_id,
                    step = %step,
                    exit_code = exit_code,
                    duration_ms = millis(*duration),
                    timed_out = timed_out,
                    "step.end"
                );
            }
            ApplyEvent::StepSkipped {
                run_id,
                step,
                reason,
            } => {
                info!(run_id = %run_id, step = %step, reason = %reason, "step.skipped");
            }
            ApplyEvent::RebootScheduled {
                run_id,
                next_step,
                reboot_count,
            } => {
                warn!(run_id = %run_id, next_step = %next_step, reboot_count = reboot_count, "run.reboot_scheduled");
            }
            ApplyEvent::RunFinished {
                run_id,
                convergence,
                mission_complete,
                blocking_failures,
            } => {
                info!(
                    run_id = %run_id,
                    convergence = %convergence,
                    mission_complete = mission_complete,
                    blocking_failures = blocking_failures,
                    "run.end"
                );
            }
            ApplyEvent::Error { component, message } => {
                warn!(component = %component, error = %message, "error");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
