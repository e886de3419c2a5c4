//! # taxhub-notify
//!
//! In-process pub/sub for job lifecycle events, backing the SSE push
//! layer in single-node deployments. One broadcast channel carries all
//! events; subscribers filter by `session_id` for per-session streams.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use taxhub_core::events::JobEvent;
use taxhub_core::traits::EventSink;

/// Default broadcast buffer size.
const DEFAULT_BUFFER: usize = 256;

/// Broadcast-channel [`EventSink`] implementation.
///
/// Publishing never fails the caller: with no subscribers the event is
/// simply dropped, and a slow subscriber that lags past the buffer
/// misses events (SSE clients are expected to re-sync from the store).
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<JobEvent>,
}

impl BroadcastEventSink {
    /// Create a sink with the given per-subscriber buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: JobEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for job event, dropped");
        }
    }
}
