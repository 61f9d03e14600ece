use super::traits::{ApplyEvent, ApplyObserver};

/// Observer that discards every event.
pub struct NoopObserver;

impl ApplyObserver for NoopObserver {
    #[inline(always)]
    fn record_event(&self, _event: &ApplyEvent) {}

    fn name(&self) -> &str {
        "noop"
    }
}
