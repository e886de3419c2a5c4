//! Retry/backoff policy configuration.
//!
//! The exact delay curve is a product parameter; the only hard
//! requirement is that the delay is monotonically non-decreasing
//! with the retry count.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy for automatic retries of failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Constant delay between attempts.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Exponentially growing delay, clamped to a maximum.
    Exponential {
        /// Delay before the first retry, in milliseconds.
        base_ms: u64,
        /// Growth factor applied per retry.
        multiplier: u32,
        /// Upper clamp on the delay, in milliseconds.
        max_delay_ms: u64,
    },
}

impl BackoffPolicy {
    /// Compute the delay before the attempt with the given retry count
    /// (1 for the first retry). Monotonically non-decreasing.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Exponential {
                base_ms,
                multiplier,
                max_delay_ms,
            } => {
                let exp = retry_count.saturating_sub(1);
                (*multiplier as u64)
                    .saturating_pow(exp)
                    .saturating_mul(*base_ms)
                    .min(*max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 1000,
            multiplier: 2,
            max_delay_ms: 60_000,
        }
    }
}

/// Retry policy configuration: a default policy plus per-job-type overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Policy applied when no per-type override matches.
    #[serde(default)]
    pub default: BackoffPolicy,
    /// Overrides keyed by job type name (e.g. `"document_processing"`).
    #[serde(default)]
    pub per_type: HashMap<String, BackoffPolicy>,
}
