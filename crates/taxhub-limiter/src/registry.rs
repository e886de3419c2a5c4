//! Named quota pools.

use std::collections::HashMap;
use std::sync::Arc;

use taxhub_core::config::rate_limit::RateLimitConfig;

use crate::limiter::{Decision, FixedWindowLimiter};

/// The quota pools guarding each endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatePool {
    /// Global per-IP quota.
    Global,
    /// Per-API-key quota.
    ApiKey,
    /// Document uploads.
    Upload,
    /// Conversation/chat messages.
    Conversation,
    /// Job submissions.
    JobCreation,
    /// Short-window burst protection.
    Burst,
    /// Sensitive operations (low limit, long window).
    Sensitive,
}

impl RatePool {
    /// Pool name used in logs and response headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::ApiKey => "api_key",
            Self::Upload => "upload",
            Self::Conversation => "conversation",
            Self::JobCreation => "job_creation",
            Self::Burst => "burst",
            Self::Sensitive => "sensitive",
        }
    }

    /// All pools.
    pub const ALL: [RatePool; 7] = [
        Self::Global,
        Self::ApiKey,
        Self::Upload,
        Self::Conversation,
        Self::JobCreation,
        Self::Burst,
        Self::Sensitive,
    ];
}

/// Holds one [`FixedWindowLimiter`] per pool.
#[derive(Debug)]
pub struct LimiterRegistry {
    pools: HashMap<RatePool, Arc<FixedWindowLimiter>>,
}

impl LimiterRegistry {
    /// Build every pool from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let keys = config.max_tracked_keys;
        let mut pools = HashMap::new();
        pools.insert(
            RatePool::Global,
            Arc::new(FixedWindowLimiter::new(config.global, keys)),
        );
        pools.insert(
            RatePool::ApiKey,
            Arc::new(FixedWindowLimiter::new(config.api_key, keys)),
        );
        pools.insert(
            RatePool::Upload,
            Arc::new(FixedWindowLimiter::new(config.upload, keys)),
        );
        pools.insert(
            RatePool::Conversation,
            Arc::new(FixedWindowLimiter::new(config.conversation, keys)),
        );
        pools.insert(
            RatePool::JobCreation,
            Arc::new(FixedWindowLimiter::new(config.job_creation, keys)),
        );
        pools.insert(
            RatePool::Burst,
            Arc::new(FixedWindowLimiter::new(config.burst, keys)),
        );
        pools.insert(
            RatePool::Sensitive,
            Arc::new(FixedWindowLimiter::new(config.sensitive, keys)),
        );
        Self { pools }
    }

    /// Record one request against a pool.
    pub fn check(&self, pool: RatePool, key: &str) -> Decision {
        self.limiter(pool).check(key)
    }

    /// The limiter backing a pool.
    pub fn limiter(&self, pool: RatePool) -> &Arc<FixedWindowLimiter> {
        // Every variant is inserted in `from_config`.
        &self.pools[&pool]
    }

    /// Scale every pool's effective limit.
    pub fn apply_scale(&self, scale: f64) {
        for limiter in self.pools.values() {
            limiter.set_scale(scale);
        }
    }

    /// Highest key-cache occupancy across pools.
    pub fn max_occupancy(&self) -> f64 {
        self.pools
            .values()
            .map(|l| l.occupancy())
            .fold(0.0, f64::max)
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
