//! Queue observability snapshot.

use std::collections::HashMap;

use serde::Serialize;

/// Point-in-time view of queue and worker state, served by the stats
/// endpoint and logged periodically by the runner.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Job counts by status, every status present.
    pub by_status: HashMap<String, u64>,
    /// Job counts by type, only types with at least one record.
    pub by_type: HashMap<String, u64>,
    /// Entries currently in the dispatch queue, blocked included.
    pub queue_depth: usize,
    /// Queue entries gated on an incomplete dependency.
    pub blocked: usize,
    /// Attempts currently holding a concurrency slot.
    pub in_flight: usize,
    /// Configured concurrency ceiling.
    pub max_concurrent_jobs: usize,
    /// Job types with a registered handler.
    pub registered_types: Vec<String>,
    /// Identifier of this worker process.
    pub worker_id: String,
}
