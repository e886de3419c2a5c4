//! Retention cleanup handler: purges settled jobs past the retention
//! window. Scheduled externally (cron or an admin endpoint submitting
//! a `cleanup` job).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use taxhub_entity::job::{Job, JobType, LogLevel};
use taxhub_store::JobStore;

use crate::context::JobContext;
use crate::executor::{JobExecutionError, JobHandler};

/// Handler for [`JobType::Cleanup`] jobs.
pub struct RetentionCleanupHandler {
    store: Arc<dyn JobStore>,
    default_retention_days: i64,
}

impl RetentionCleanupHandler {
    /// Create a handler purging terminal jobs older than the given
    /// number of days unless the job payload overrides it.
    pub fn new(store: Arc<dyn JobStore>, default_retention_days: i64) -> Self {
        Self {
            store,
            default_retention_days,
        }
    }
}

impl fmt::Debug for RetentionCleanupHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionCleanupHandler")
            .field("default_retention_days", &self.default_retention_days)
            .finish()
    }
}

#[async_trait]
impl JobHandler for RetentionCleanupHandler {
    fn job_type(&self) -> JobType {
        JobType::Cleanup
    }

    async fn execute(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let days = job
            .payload
            .get("older_than_days")
            .and_then(Value::as_i64)
            .unwrap_or(self.default_retention_days);
        if days < 0 {
            return Err(JobExecutionError::Permanent(format!(
                "older_than_days must be non-negative, got {days}"
            )));
        }

        ctx.checkpoint()?;
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let removed = self
            .store
            .delete_terminal_older_than(cutoff)
            .await
            .map_err(|err| JobExecutionError::Transient(err.to_string()))?;

        ctx.log(
            LogLevel::Info,
            format!("purged {removed} settled jobs older than {days} days"),
        )
        .await?;

        Ok(Some(json!({ "removed": removed, "older_than_days": days })))
    }
}
