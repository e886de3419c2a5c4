//! In-memory job store on `dashmap`.
//!
//! Each record lives in its own dashmap entry; `update` applies the
//! patch while holding the entry's write guard, which gives the atomic
//! patch semantics the [`JobStore`](crate::JobStore) contract requires
//! without a global lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use taxhub_core::error::AppError;
use taxhub_core::result::AppResult;
use taxhub_core::types::id::{JobId, SessionId};
use taxhub_core::types::pagination::{PageRequest, PageResponse};
use taxhub_entity::job::{Job, JobPatch, JobStatus, JobType};

use crate::JobStore;

/// In-memory [`JobStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, Job>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> AppResult<()> {
        let id = job.id;
        match self.jobs.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::conflict(format!(
                "job {id} already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job);
                debug!(job_id = %id, "Inserted job record");
                Ok(())
            }
        }
    }

    async fn get(&self, id: JobId) -> AppResult<Option<Job>> {
        Ok(self.jobs.get(&id).map(|entry| entry.clone()))
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> AppResult<Job> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;
        if let Some(expected) = patch.expect_status {
            if entry.status != expected {
                return Err(AppError::conflict(format!(
                    "job {id} is {}, expected {expected}",
                    entry.status
                )));
            }
        }
        patch.apply(entry.value_mut());
        Ok(entry.clone())
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        Ok(self.jobs.remove(&id).is_some())
    }

    async fn list_by_session(
        &self,
        session_id: SessionId,
        status: Option<JobStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Job>> {
        let mut matches: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.session_id == session_id
                    && status.map_or(true, |s| entry.status == s)
            })
            .map(|entry| entry.clone())
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matches.len();
        let items: Vec<Job> = matches
            .into_iter()
            .skip(page.offset())
            .take(page.per_page)
            .collect();

        Ok(PageResponse::new(items, page, total))
    }

    async fn list_by_status(&self, status: JobStatus) -> AppResult<Vec<Job>> {
        let mut matches: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.clone())
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches)
    }

    async fn count_by_status(&self) -> AppResult<HashMap<JobStatus, u64>> {
        let mut counts: HashMap<JobStatus, u64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for entry in self.jobs.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_type(&self) -> AppResult<HashMap<JobType, u64>> {
        let mut counts: HashMap<JobType, u64> = HashMap::new();
        for entry in self.jobs.iter() {
            *counts.entry(entry.job_type).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        let removed = (before - self.jobs.len()) as u64;
        debug!(removed, %cutoff, "Purged terminal jobs");
        Ok(removed)
    }
}
