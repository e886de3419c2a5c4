//! # taxhub-store
//!
//! The job record store collaborator: the [`JobStore`] trait consumed by
//! the queue core, plus the in-memory [`MemoryJobStore`] used for
//! single-process deployments and tests. A durable document-database
//! implementation satisfies the same trait in the full product.
//!
//! The store is the single source of truth for job state. The in-memory
//! priority queue is a derived, rebuildable index over it.

pub mod memory;

pub use memory::MemoryJobStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taxhub_core::result::AppResult;
use taxhub_core::types::id::{JobId, SessionId};
use taxhub_core::types::pagination::{PageRequest, PageResponse};
use taxhub_entity::job::{Job, JobPatch, JobStatus, JobType};

/// Durable persistence for job documents.
///
/// Implementations must apply [`JobPatch`]es atomically: a progress
/// update and a status transition for the same job must never produce a
/// lost update.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new job record. Fails with a conflict if the ID exists.
    async fn insert(&self, job: Job) -> AppResult<()>;

    /// Fetch a job by ID.
    async fn get(&self, id: JobId) -> AppResult<Option<Job>>;

    /// Atomically apply a patch and return the updated record.
    /// Fails with not-found if the job does not exist. When the patch
    /// carries `expect_status`, the current status must match or the
    /// patch is rejected with a conflict; the check and the apply must
    /// happen under the same record lock.
    async fn update(&self, id: JobId, patch: JobPatch) -> AppResult<Job>;

    /// Delete a job record. Returns `true` if a record was removed.
    async fn delete(&self, id: JobId) -> AppResult<bool>;

    /// List a session's jobs, optionally filtered by status, newest first.
    async fn list_by_session(
        &self,
        session_id: SessionId,
        status: Option<JobStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Job>>;

    /// All jobs currently in the given status (used for queue recovery).
    async fn list_by_status(&self, status: JobStatus) -> AppResult<Vec<Job>>;

    /// Job counts grouped by status.
    async fn count_by_status(&self) -> AppResult<HashMap<JobStatus, u64>>;

    /// Job counts grouped by type.
    async fn count_by_type(&self) -> AppResult<HashMap<JobType, u64>>;

    /// Delete terminal jobs last updated before the cutoff.
    /// Returns the number of records removed.
    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}
