//! Retry decision logic layered over the configured backoff policies.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use taxhub_core::config::retry::{BackoffPolicy, RetryConfig};
use taxhub_entity::job::JobType;

/// Outcome of consulting the retry controller after a transient
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-admit the job after the given delay.
    Retry { delay: Duration },
    /// The retry budget is exhausted; finalize as failed.
    GiveUp,
}

/// Resolved backoff policies, one per job type plus a default.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    default: BackoffPolicy,
    per_type: HashMap<JobType, BackoffPolicy>,
}

impl RetryPolicies {
    /// Build from configuration. Entries keyed by an unrecognized job
    /// type name are logged and ignored.
    pub fn from_config(config: &RetryConfig) -> Self {
        let mut per_type = HashMap::new();
        for (name, policy) in &config.per_type {
            match JobType::from_str(name) {
                Ok(job_type) => {
                    per_type.insert(job_type, policy.clone());
                }
                Err(_) => {
                    warn!(job_type = %name, "Ignoring retry policy for unknown job type");
                }
            }
        }
        Self {
            default: config.default.clone(),
            per_type,
        }
    }

    /// The backoff policy for a job type.
    pub fn policy_for(&self, job_type: JobType) -> &BackoffPolicy {
        self.per_type.get(&job_type).unwrap_or(&self.default)
    }

    /// Decide whether a job that just failed transiently gets another
    /// attempt. `retry_count` is the number of retries already
    /// consumed; the returned delay is for attempt `retry_count + 1`.
    pub fn decide(&self, job_type: JobType, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count >= max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = self.policy_for(job_type).delay(retry_count + 1);
        RetryDecision::Retry { delay }
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
