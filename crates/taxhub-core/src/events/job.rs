//! Job lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::id::{JobId, SessionId};

/// What happened to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// Job record created and admitted to the queue.
    Created,
    /// A worker claimed the job and started executing it.
    Started,
    /// Progress updated while processing.
    Progress,
    /// Handler returned a result.
    Completed,
    /// Terminal failure (retries exhausted or permanent error).
    Failed,
    /// Job reached the cancelled state.
    Cancelled,
    /// Cancellation was requested for an in-flight job.
    CancelRequested,
    /// Automatic retry scheduled after a backoff delay.
    RetryScheduled,
    /// Job manually re-admitted after a terminal failure.
    Retried,
}

/// Event envelope pushed to the notification layer.
///
/// Publishing is fire-and-forget: a failure to deliver an event must
/// never fail the job operation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The job this event concerns.
    pub job_id: JobId,
    /// The session owning the job (used for per-session SSE fan-out).
    pub session_id: SessionId,
    /// What happened.
    pub kind: JobEventKind,
    /// Event-specific payload (progress snapshot, error message, ...).
    pub payload: serde_json::Value,
}

impl JobEvent {
    /// Create a new job event.
    pub fn new(
        job_id: JobId,
        session_id: SessionId,
        kind: JobEventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            session_id,
            kind,
            payload,
        }
    }
}
