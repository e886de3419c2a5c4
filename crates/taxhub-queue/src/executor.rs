//! Handler registry and the execution error contract.
//!
//! A [`JobHandler`] implements the work for one job type. Handlers
//! classify their own failures: [`JobExecutionError::Transient`] is
//! eligible for automatic retry, everything else finalizes the job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use taxhub_core::error::AppError;
use taxhub_entity::job::{Job, JobType};

use crate::context::JobContext;

/// Failure modes a handler can report.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The job can never succeed (bad input, unsupported content).
    /// Finalizes the job as failed without consuming retries.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The failure may clear on a later attempt (timeout, unavailable
    /// backend). Subject to the retry budget.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The handler observed the cancellation signal and stopped at a
    /// checkpoint.
    #[error("aborted at cancellation checkpoint")]
    Cancelled,

    /// Infrastructure error surfaced through the application error
    /// type. Treated as permanent.
    #[error(transparent)]
    Internal(#[from] AppError),
}

/// Work implementation for a single job type.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// The job type this handler serves.
    fn job_type(&self) -> JobType;

    /// Run one attempt. Long-running handlers should call
    /// [`JobContext::checkpoint`] between phases so cancellation takes
    /// effect promptly, and report progress through the context.
    async fn execute(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError>;
}

/// Registry mapping job types to their handlers.
#[derive(Debug, Default)]
pub struct JobExecutor {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same
    /// job type.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    /// Whether a handler is registered for the job type. The job
    /// service consults this at submission so unknown types are
    /// rejected before they ever reach the queue.
    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Job types with a registered handler.
    pub fn registered_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Dispatch one attempt to the matching handler.
    pub async fn execute(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let handler = self.handlers.get(&job.job_type).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "no handler registered for job type '{}'",
                job.job_type.as_str()
            ))
        })?;
        handler.execute(job, ctx).await
    }
}
