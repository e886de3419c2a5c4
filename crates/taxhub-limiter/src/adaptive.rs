//! Adaptive load-shedding controller.
//!
//! Samples pool occupancy on an interval and steps every effective
//! limit down to 75% or 50% of nominal as the tracked-caller caches
//! fill up, restoring 100% when pressure subsides.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use taxhub_core::config::rate_limit::AdaptiveConfig;

use crate::registry::LimiterRegistry;

const SCALE_NORMAL: f64 = 1.0;
const SCALE_HIGH: f64 = 0.75;
const SCALE_CRITICAL: f64 = 0.5;

/// Periodic occupancy sampler driving limit scaling.
pub struct AdaptiveController {
    registry: Arc<LimiterRegistry>,
    config: AdaptiveConfig,
}

impl AdaptiveController {
    /// Create a controller over the registry.
    pub fn new(registry: Arc<LimiterRegistry>, config: AdaptiveConfig) -> Self {
        Self { registry, config }
    }

    /// The scale that matches an occupancy reading.
    fn scale_for(&self, occupancy: f64) -> f64 {
        if occupancy >= self.config.critical_occupancy {
            SCALE_CRITICAL
        } else if occupancy >= self.config.high_occupancy {
            SCALE_HIGH
        } else {
            SCALE_NORMAL
        }
    }

    /// Take one sample and apply the resulting scale. Returns the
    /// scale applied.
    pub fn sample(&self) -> f64 {
        let occupancy = self.registry.max_occupancy();
        let scale = self.scale_for(occupancy);
        if scale < SCALE_NORMAL {
            warn!(occupancy, scale, "Load shedding active, rate limits reduced");
        }
        self.registry.apply_scale(scale);
        scale
    }

    /// Run the sampling loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Adaptive rate limit scaling disabled by configuration");
            return;
        }
        let interval = Duration::from_secs(self.config.sample_interval_seconds);
        info!(
            interval_seconds = self.config.sample_interval_seconds,
            high = self.config.high_occupancy,
            critical = self.config.critical_occupancy,
            "Adaptive rate limit controller started"
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Adaptive rate limit controller stopped");
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    self.sample();
                }
            }
        }
    }
}
