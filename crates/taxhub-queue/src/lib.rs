//! # taxhub-queue
//!
//! Background job processing for TaxHub: a priority queue with
//! dependency gating, a bounded-concurrency dispatch loop, automatic
//! retries with backoff, and cooperative cancellation.
//!
//! The [`JobService`] is the single entry point for queue management;
//! the [`WorkerRunner`] drives dispatch on the runtime. Handlers
//! implement [`JobHandler`] and are registered per job type on the
//! [`JobExecutor`].

pub mod context;
pub mod executor;
pub mod jobs;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod service;
pub mod stats;

pub use context::JobContext;
pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use queue::{PriorityQueue, ReadyJob};
pub use retry::{RetryDecision, RetryPolicies};
pub use runner::WorkerRunner;
pub use service::{CancelOutcome, JobService, RetryOptions};
pub use stats::QueueStats;
