//! Background job entity: model, status machine, progress, and logs.

pub mod kind;
pub mod log;
pub mod model;
pub mod progress;
pub mod status;

pub use kind::JobType;
pub use log::{JobError, JobLogEntry, LogLevel};
pub use model::{CreateJob, Job, JobMetadata, JobPatch};
pub use progress::JobProgress;
pub use status::{JobPriority, JobStatus};
