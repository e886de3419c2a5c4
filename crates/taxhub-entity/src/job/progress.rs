//! Job progress sub-record.

use serde::{Deserialize, Serialize};

/// Execution progress of a job, mutated only while the job is processing.
///
/// `percentage` is monotonically non-decreasing within a single attempt;
/// a retry resets the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Completion percentage, 0-100.
    pub percentage: u8,
    /// Human-readable description of the current step.
    pub current_step: Option<String>,
    /// Total number of steps, if the handler knows it.
    pub total_steps: Option<u32>,
    /// Number of steps finished so far.
    pub completed_steps: u32,
    /// Handler's estimate of remaining time, in seconds.
    pub estimated_seconds_remaining: Option<u64>,
}

impl JobProgress {
    /// Progress record for a finished job.
    pub fn finished() -> Self {
        Self {
            percentage: 100,
            current_step: None,
            total_steps: None,
            completed_steps: 0,
            estimated_seconds_remaining: Some(0),
        }
    }

    /// Progress at a given percentage with a step label.
    pub fn at(percentage: u8, step: impl Into<String>) -> Self {
        Self {
            percentage: percentage.min(100),
            current_step: Some(step.into()),
            ..Default::default()
        }
    }
}
