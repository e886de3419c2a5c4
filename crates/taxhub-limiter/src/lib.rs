//! # taxhub-limiter
//!
//! Fixed-window rate limiting for the TaxHub API surface: one
//! [`FixedWindowLimiter`] per named quota pool, caller state in a
//! bounded LRU cache with idle expiry, and an [`AdaptiveController`]
//! that sheds load by scaling effective limits down under pressure.

pub mod adaptive;
pub mod keys;
pub mod limiter;
pub mod registry;

pub use adaptive::AdaptiveController;
pub use limiter::{Decision, FixedWindowLimiter};
pub use registry::{LimiterRegistry, RatePool};
