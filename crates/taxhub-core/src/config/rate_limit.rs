//! Rate limiter configuration.
//!
//! Each named pool is an independent fixed-window quota guarding one
//! endpoint class. Pools share nothing; a caller exhausting the upload
//! quota can still create conversations.

use serde::{Deserialize, Serialize};

/// Limit and window for a single quota pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum requests per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl PoolConfig {
    /// Create a new pool configuration.
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

/// Adaptive load-shedding configuration.
///
/// The controller periodically samples each pool's key-cache occupancy
/// and scales effective limits down when the process is tracking close
/// to its capacity of distinct callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Whether adaptive scaling is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between occupancy samples.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
    /// Occupancy ratio above which limits drop to 75% of nominal.
    #[serde(default = "default_high_occupancy")]
    pub high_occupancy: f64,
    /// Occupancy ratio above which limits drop to 50% of nominal.
    #[serde(default = "default_critical_occupancy")]
    pub critical_occupancy: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_seconds: default_sample_interval(),
            high_occupancy: default_high_occupancy(),
            critical_occupancy: default_critical_occupancy(),
        }
    }
}

/// Rate limiter configuration: bounded key cache plus the named pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum distinct caller keys tracked per pool (LRU bound).
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: u64,
    /// Adaptive load-shedding settings.
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    /// Global per-IP quota.
    #[serde(default = "default_global")]
    pub global: PoolConfig,
    /// Per-API-key quota.
    #[serde(default = "default_api_key")]
    pub api_key: PoolConfig,
    /// Document upload quota.
    #[serde(default = "default_upload")]
    pub upload: PoolConfig,
    /// Conversation/chat quota.
    #[serde(default = "default_conversation")]
    pub conversation: PoolConfig,
    /// Job creation quota.
    #[serde(default = "default_job_creation")]
    pub job_creation: PoolConfig,
    /// Short-window burst quota.
    #[serde(default = "default_burst")]
    pub burst: PoolConfig,
    /// Sensitive-operation quota (long window, low limit).
    #[serde(default = "default_sensitive")]
    pub sensitive: PoolConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tracked_keys: default_max_tracked_keys(),
            adaptive: AdaptiveConfig::default(),
            global: default_global(),
            api_key: default_api_key(),
            upload: default_upload(),
            conversation: default_conversation(),
            job_creation: default_job_creation(),
            burst: default_burst(),
            sensitive: default_sensitive(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_interval() -> u64 {
    30
}

fn default_high_occupancy() -> f64 {
    0.7
}

fn default_critical_occupancy() -> f64 {
    0.9
}

fn default_max_tracked_keys() -> u64 {
    10_000
}

fn default_global() -> PoolConfig {
    PoolConfig::new(100, 60_000)
}

fn default_api_key() -> PoolConfig {
    PoolConfig::new(60, 60_000)
}

fn default_upload() -> PoolConfig {
    PoolConfig::new(10, 60_000)
}

fn default_conversation() -> PoolConfig {
    PoolConfig::new(20, 60_000)
}

fn default_job_creation() -> PoolConfig {
    PoolConfig::new(10, 60_000)
}

fn default_burst() -> PoolConfig {
    PoolConfig::new(10, 1_000)
}

fn default_sensitive() -> PoolConfig {
    PoolConfig::new(5, 300_000)
}
