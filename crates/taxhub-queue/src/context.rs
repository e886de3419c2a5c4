//! Per-attempt execution context handed to job handlers.

use std::sync::Arc;

use tokio::sync::watch;

use taxhub_core::result::AppResult;
use taxhub_core::types::id::{JobId, SessionId};
use taxhub_entity::job::{Job, JobLogEntry, JobProgress, LogLevel};

use crate::executor::JobExecutionError;
use crate::service::JobService;

/// Handle a running handler uses to report progress, append logs, and
/// observe the cooperative cancellation signal for its attempt.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    session_id: SessionId,
    cancel: watch::Receiver<bool>,
    service: Arc<JobService>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        session_id: SessionId,
        cancel: watch::Receiver<bool>,
        service: Arc<JobService>,
    ) -> Self {
        Self {
            job_id,
            session_id,
            cancel,
            service,
        }
    }

    /// The job being executed.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The session the job belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Whether cancellation has been requested for this attempt.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    /// Handlers call this between phases of work.
    pub fn checkpoint(&self) -> Result<(), JobExecutionError> {
        if self.is_cancelled() {
            Err(JobExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve when cancellation is requested. Useful in `select!`
    /// around a long await inside a handler.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Report progress for the running attempt. Subject to the same
    /// monotonicity rules as the public progress endpoint.
    pub async fn update_progress(&self, progress: JobProgress) -> AppResult<Job> {
        self.service.update_progress(self.job_id, progress).await
    }

    /// Append a log entry to the job record.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> AppResult<()> {
        self.service
            .add_log(self.job_id, JobLogEntry::new(level, message))
            .await
    }
}
