//! Event notification collaborator trait.

use async_trait::async_trait;

use crate::events::JobEvent;

/// Fire-and-forget push of job lifecycle events.
///
/// Implementations deliver events to the SSE layer (or drop them when
/// nobody is listening). Delivery failures are the implementation's
/// problem to log; they are never surfaced to the job operation that
/// published the event.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Publish an event. Infallible by contract.
    async fn publish(&self, event: JobEvent);
}

/// An [`EventSink`] that discards every event. Useful in tests and in
/// deployments without a push layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: JobEvent) {}
}
