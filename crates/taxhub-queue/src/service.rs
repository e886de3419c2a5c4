//! Queue management service.
//!
//! [`JobService`] owns the priority queue, the concurrency slots, and
//! the per-job cancellation signals. Every state transition goes
//! through the job record store as one atomic patch, and every
//! transition of interest emits an event through the sink.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taxhub_core::config::queue::QueueConfig;
use taxhub_core::config::retry::RetryConfig;
use taxhub_core::error::{AppError, ErrorKind};
use taxhub_core::events::{JobEvent, JobEventKind};
use taxhub_core::result::AppResult;
use taxhub_core::traits::EventSink;
use taxhub_core::types::id::{JobId, SessionId};
use taxhub_core::types::pagination::{PageRequest, PageResponse};
use taxhub_entity::job::{
    CreateJob, Job, JobError, JobLogEntry, JobPatch, JobPriority, JobProgress, JobStatus,
    LogLevel,
};
use taxhub_store::JobStore;

use crate::executor::{JobExecutionError, JobExecutor};
use crate::context::JobContext;
use crate::queue::PriorityQueue;
use crate::retry::{RetryDecision, RetryPolicies};
use crate::stats::QueueStats;

/// Options for manually retrying a failed job.
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    /// Override the priority for the retried run.
    pub priority: Option<JobPriority>,
    /// Reset progress to zero instead of keeping the last snapshot.
    pub reset_progress: bool,
}

/// Result of a cancellation request.
///
/// Cancelling a terminal job is a no-op, not an error: the caller
/// learns the job already settled and in which state.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job was pending and is now cancelled.
    Cancelled(Job),
    /// The job is processing; the cooperative signal was raised and
    /// the job will settle when the handler reaches a checkpoint.
    CancelRequested(Job),
    /// The job had already reached the given terminal state.
    NotCancellable(JobStatus),
}

/// The queue management service.
pub struct JobService {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn EventSink>,
    executor: Arc<JobExecutor>,
    queue: Mutex<PriorityQueue>,
    /// Wakes the dispatch loop when work may have become available.
    wake: Notify,
    /// Concurrency slots; one permit per in-flight attempt.
    slots: Arc<Semaphore>,
    /// Cancellation signal senders for in-flight attempts.
    cancels: DashMap<JobId, watch::Sender<bool>>,
    retries: RetryPolicies,
    config: QueueConfig,
    worker_id: String,
}

impl JobService {
    /// Assemble the service. The queue starts empty; call
    /// [`recover`](Self::recover) to re-admit persisted pending jobs.
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn EventSink>,
        executor: Arc<JobExecutor>,
        queue_config: QueueConfig,
        retry_config: &RetryConfig,
    ) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(queue_config.max_concurrent_jobs));
        Arc::new(Self {
            store,
            sink,
            executor,
            queue: Mutex::new(PriorityQueue::new()),
            wake: Notify::new(),
            slots,
            cancels: DashMap::new(),
            retries: RetryPolicies::from_config(retry_config),
            config: queue_config,
            worker_id: format!("worker-{}", Uuid::new_v4()),
        })
    }

    /// Queue configuration in effect.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate, persist, and enqueue a new job.
    pub async fn create_job(&self, params: CreateJob) -> AppResult<Job> {
        if !self.executor.has_handler(params.job_type) {
            return Err(AppError::validation(format!(
                "no handler registered for job type '{}'",
                params.job_type.as_str()
            )));
        }

        for dep in &params.dependencies {
            if self.store.get(*dep).await?.is_none() {
                return Err(AppError::validation(format!(
                    "dependency job {dep} does not exist"
                )));
            }
        }
        if let Some(parent) = params.parent_job_id {
            if self.store.get(parent).await?.is_none() {
                return Err(AppError::validation(format!(
                    "parent job {parent} does not exist"
                )));
            }
        }

        let job = Job::from_create(params);
        self.store.insert(job.clone()).await?;

        if let Some(parent) = job.metadata.parent_job_id {
            self.store
                .update(
                    parent,
                    JobPatch {
                        push_child: Some(job.id),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let waiting_on = self.unresolved_deps(&job.metadata.dependencies).await?;
        self.queue
            .lock()
            .await
            .enqueue(job.id, job.priority, job.created_at, waiting_on);
        self.wake.notify_one();

        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            priority = job.priority.as_str(),
            "Job created and enqueued"
        );
        self.emit(
            &job,
            JobEventKind::Created,
            json!({
                "job_type": job.job_type.as_str(),
                "priority": job.priority.as_str(),
            }),
        )
        .await;

        Ok(job)
    }

    /// Fetch a job by ID.
    pub async fn get_job(&self, id: JobId) -> AppResult<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))
    }

    /// List jobs for a session, newest first, optionally filtered by
    /// status.
    pub async fn list_jobs_by_session(
        &self,
        session_id: SessionId,
        status: Option<JobStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Job>> {
        self.store.list_by_session(session_id, status, page).await
    }

    /// Update progress for a processing job. Percentage must not
    /// decrease within an attempt and cannot exceed 100.
    pub async fn update_progress(&self, id: JobId, progress: JobProgress) -> AppResult<Job> {
        if progress.percentage > 100 {
            return Err(AppError::validation(
                "progress percentage cannot exceed 100",
            ));
        }
        let job = self.get_job(id).await?;
        if job.status != JobStatus::Processing {
            return Err(AppError::conflict(format!(
                "job {id} is {} and does not accept progress updates",
                job.status
            )));
        }
        if progress.percentage < job.progress.percentage {
            return Err(AppError::validation(format!(
                "progress percentage cannot decrease ({} -> {})",
                job.progress.percentage, progress.percentage
            )));
        }

        let percentage = progress.percentage;
        let updated = self
            .store
            .update(
                id,
                JobPatch {
                    expect_status: Some(JobStatus::Processing),
                    progress: Some(progress),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(
            &updated,
            JobEventKind::Progress,
            json!({ "percentage": percentage }),
        )
        .await;
        Ok(updated)
    }

    /// Force a status transition through the management API.
    ///
    /// The transition must be legal in the status state machine or the
    /// call fails with a conflict. Transitions with richer dedicated
    /// operations are routed through them so their side effects apply:
    /// `-> cancelled` goes through [`cancel_job`](Self::cancel_job) and
    /// `failed -> pending` through [`retry_job`](Self::retry_job).
    pub async fn update_status(&self, id: JobId, status: JobStatus) -> AppResult<Job> {
        let job = self.get_job(id).await?;
        if !job.status.can_transition_to(status) {
            return Err(AppError::conflict(format!(
                "job {id} cannot transition from {} to {status}",
                job.status
            )));
        }

        match (job.status, status) {
            (_, JobStatus::Cancelled) => match self.cancel_job(id).await? {
                CancelOutcome::Cancelled(updated)
                | CancelOutcome::CancelRequested(updated) => Ok(updated),
                CancelOutcome::NotCancellable(current) => Err(AppError::conflict(format!(
                    "job {id} settled as {current} before the transition applied"
                ))),
            },
            (JobStatus::Failed, JobStatus::Pending) => {
                self.retry_job(id, RetryOptions::default()).await
            }
            (from, JobStatus::Processing) => {
                // Claim on behalf of an external worker: take the entry
                // out of the queue so the dispatch loop cannot claim it
                // a second time.
                self.queue.lock().await.remove(id);
                let updated = self
                    .store
                    .update(
                        id,
                        JobPatch {
                            expect_status: Some(from),
                            status: Some(JobStatus::Processing),
                            started_at: Some(Utc::now()),
                            assigned_worker: Some(Some(self.worker_id.clone())),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(job_id = %id, "Job marked processing via status update");
                self.emit(
                    &updated,
                    JobEventKind::Started,
                    json!({ "worker": self.worker_id }),
                )
                .await;
                Ok(updated)
            }
            (from, to) => {
                // processing -> completed | failed
                let mut patch = JobPatch {
                    expect_status: Some(from),
                    status: Some(to),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                };
                let kind = if to == JobStatus::Completed {
                    patch.progress = Some(JobProgress::finished());
                    JobEventKind::Completed
                } else {
                    patch.push_error =
                        Some(JobError::new("marked failed via status update").with_code("manual"));
                    JobEventKind::Failed
                };
                let updated = self.store.update(id, patch).await?;
                info!(job_id = %id, status = to.as_str(), "Job settled via status update");
                self.emit(&updated, kind, json!({ "via": "status_update" })).await;
                if to == JobStatus::Completed {
                    let unblocked = { self.queue.lock().await.resolve_dependency(id) };
                    if unblocked > 0 {
                        self.wake.notify_one();
                    }
                }
                Ok(updated)
            }
        }
    }

    /// Append an execution log line to a job.
    pub async fn add_log(&self, id: JobId, entry: JobLogEntry) -> AppResult<()> {
        self.store
            .update(
                id,
                JobPatch {
                    push_log: Some(entry),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Execution log of a job.
    pub async fn get_logs(&self, id: JobId) -> AppResult<Vec<JobLogEntry>> {
        Ok(self.get_job(id).await?.logs)
    }

    /// Request cancellation of a job.
    ///
    /// Pending jobs settle immediately; processing jobs get the
    /// cooperative signal and settle at the handler's next checkpoint;
    /// terminal jobs are untouched.
    ///
    /// Every patch here carries a status precondition: a job claimed
    /// between our read and our write bounces with a conflict and we
    /// re-read, so cancellation never clobbers a concurrent transition.
    pub async fn cancel_job(&self, id: JobId) -> AppResult<CancelOutcome> {
        loop {
            let job = self.get_job(id).await?;
            match job.status {
                JobStatus::Pending => {
                    let patch = JobPatch {
                        expect_status: Some(JobStatus::Pending),
                        status: Some(JobStatus::Cancelled),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    };
                    match self.store.update(id, patch).await {
                        Ok(updated) => {
                            self.queue.lock().await.remove(id);
                            info!(job_id = %id, "Cancelled pending job");
                            self.emit(&updated, JobEventKind::Cancelled, json!({ "was": "pending" }))
                                .await;
                            return Ok(CancelOutcome::Cancelled(updated));
                        }
                        Err(err) if err.kind == ErrorKind::Conflict => {
                            debug!(job_id = %id, "Job transitioned during cancellation, re-reading");
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
                JobStatus::Processing => {
                    if let Some(tx) = self.cancels.get(&id) {
                        let _ = tx.send(true);
                    }
                    let patch = JobPatch {
                        expect_status: Some(JobStatus::Processing),
                        push_log: Some(JobLogEntry::new(
                            LogLevel::Info,
                            "cancellation requested",
                        )),
                        ..Default::default()
                    };
                    match self.store.update(id, patch).await {
                        Ok(updated) => {
                            info!(job_id = %id, "Cancellation signalled to in-flight job");
                            self.emit(&updated, JobEventKind::CancelRequested, json!({}))
                                .await;
                            return Ok(CancelOutcome::CancelRequested(updated));
                        }
                        Err(err) if err.kind == ErrorKind::Conflict => {
                            debug!(job_id = %id, "Job settled during cancellation, re-reading");
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
                status => {
                    debug!(job_id = %id, status = status.as_str(), "Cancel request on settled job ignored");
                    return Ok(CancelOutcome::NotCancellable(status));
                }
            }
        }
    }

    /// Manually re-admit a failed job.
    ///
    /// Counts as a retry: `retry_count` increments, and when the budget
    /// was already exhausted `max_retries` is raised to match so the
    /// budget invariant holds. Accumulated error records are kept.
    pub async fn retry_job(&self, id: JobId, options: RetryOptions) -> AppResult<Job> {
        let job = self.get_job(id).await?;
        if !job.status.can_retry() {
            return Err(AppError::conflict(format!(
                "job {id} is {} and cannot be retried",
                job.status
            )));
        }

        let new_count = job.metadata.retry_count + 1;
        let mut patch = JobPatch {
            expect_status: Some(JobStatus::Failed),
            status: Some(JobStatus::Pending),
            retry_count: Some(new_count),
            assigned_worker: Some(None),
            priority: options.priority,
            clear_completed_at: true,
            ..Default::default()
        };
        if new_count > job.metadata.max_retries {
            patch.max_retries = Some(new_count);
        }
        if options.reset_progress {
            patch.progress = Some(JobProgress::default());
        }

        let updated = self.store.update(id, patch).await?;
        let waiting_on = self.unresolved_deps(&updated.metadata.dependencies).await?;
        self.queue
            .lock()
            .await
            .enqueue(updated.id, updated.priority, updated.created_at, waiting_on);
        self.wake.notify_one();

        info!(job_id = %id, retry_count = new_count, "Failed job manually re-admitted");
        self.emit(
            &updated,
            JobEventKind::Retried,
            json!({ "retry_count": new_count }),
        )
        .await;
        Ok(updated)
    }

    /// Delete a settled job record. Active jobs must be cancelled
    /// first.
    pub async fn delete_job(&self, id: JobId) -> AppResult<()> {
        let job = self.get_job(id).await?;
        if !job.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "job {id} is {} and cannot be deleted",
                job.status
            )));
        }
        self.store.delete(id).await?;
        debug!(job_id = %id, "Deleted job record");
        Ok(())
    }

    /// Purge terminal jobs older than the retention window.
    pub async fn cleanup_completed(&self, older_than_days: i64) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let removed = self.store.delete_terminal_older_than(cutoff).await?;
        info!(removed, older_than_days, "Purged settled jobs past retention");
        Ok(removed)
    }

    /// Snapshot of queue and worker state.
    pub async fn queue_stats(&self) -> AppResult<QueueStats> {
        let by_status = self.store.count_by_status().await?;
        let by_type = self.store.count_by_type().await?;
        let (queue_depth, blocked) = {
            let queue = self.queue.lock().await;
            (queue.len(), queue.blocked_len())
        };
        let max = self.config.max_concurrent_jobs;
        Ok(QueueStats {
            by_status: by_status
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v))
                .collect(),
            by_type: by_type
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v))
                .collect(),
            queue_depth,
            blocked,
            in_flight: max.saturating_sub(self.slots.available_permits()),
            max_concurrent_jobs: max,
            registered_types: self
                .executor
                .registered_types()
                .into_iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            worker_id: self.worker_id.clone(),
        })
    }

    /// Rebuild the queue from the store on startup.
    ///
    /// Jobs stuck in `processing` from an unclean shutdown are moved
    /// back to `pending` first, then every pending job is admitted.
    /// Returns the number of jobs admitted.
    pub async fn recover(&self) -> AppResult<usize> {
        let orphans = self.store.list_by_status(JobStatus::Processing).await?;
        for job in &orphans {
            warn!(job_id = %job.id, "Re-admitting job orphaned in processing");
            self.store
                .update(
                    job.id,
                    JobPatch {
                        expect_status: Some(JobStatus::Processing),
                        status: Some(JobStatus::Pending),
                        assigned_worker: Some(None),
                        push_log: Some(JobLogEntry::new(
                            LogLevel::Warn,
                            "re-admitted after unclean shutdown",
                        )),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let pending = self.store.list_by_status(JobStatus::Pending).await?;
        let mut entries = Vec::with_capacity(pending.len());
        for job in pending {
            let waiting_on = self.unresolved_deps(&job.metadata.dependencies).await?;
            entries.push((job.id, job.priority, job.created_at, waiting_on));
        }

        let mut queue = self.queue.lock().await;
        let mut admitted = 0;
        for (id, priority, created_at, waiting_on) in entries {
            if queue.contains(id) {
                continue;
            }
            queue.enqueue(id, priority, created_at, waiting_on);
            admitted += 1;
        }
        drop(queue);

        if admitted > 0 {
            info!(admitted, "Recovered pending jobs into the queue");
            self.wake.notify_one();
        }
        Ok(admitted)
    }

    // ---- dispatch internals -------------------------------------------

    /// Try to take a concurrency slot without waiting.
    pub(crate) fn try_acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Wait until something signals that work may be available.
    pub(crate) async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    /// Wait for every in-flight attempt to release its slot.
    pub(crate) async fn drain(&self) {
        let total = self.config.max_concurrent_jobs as u32;
        if let Ok(permit) = self.slots.acquire_many(total).await {
            drop(permit);
        }
    }

    /// Pop the next eligible job and transition it to `processing`.
    ///
    /// A store failure mid-claim puts the popped entry back at its
    /// original position instead of stranding it until the next
    /// recovery pass.
    pub(crate) async fn claim_next(&self) -> Option<Job> {
        loop {
            let ready = { self.queue.lock().await.dequeue() }?;
            let id = ready.job_id;

            // The record may have been cancelled or deleted while
            // queued; skip stale entries.
            match self.store.get(id).await {
                Ok(Some(job)) if job.status == JobStatus::Pending => {}
                Ok(_) => {
                    debug!(job_id = %id, "Skipping stale queue entry");
                    continue;
                }
                Err(err) => {
                    error!(job_id = %id, error = %err, "Store error while claiming; job re-admitted");
                    self.queue.lock().await.enqueue(
                        id,
                        ready.priority,
                        ready.created_at,
                        HashSet::new(),
                    );
                    return None;
                }
            }

            let patch = JobPatch {
                expect_status: Some(JobStatus::Pending),
                status: Some(JobStatus::Processing),
                started_at: Some(Utc::now()),
                assigned_worker: Some(Some(self.worker_id.clone())),
                ..Default::default()
            };
            match self.store.update(id, patch).await {
                Ok(job) => {
                    self.emit(
                        &job,
                        JobEventKind::Started,
                        json!({ "worker": self.worker_id }),
                    )
                    .await;
                    return Some(job);
                }
                Err(err) if err.kind == ErrorKind::NotFound => {
                    warn!(job_id = %id, "Dequeued job vanished, skipping");
                    continue;
                }
                Err(err) if err.kind == ErrorKind::Conflict => {
                    debug!(job_id = %id, "Job transitioned while queued, skipping");
                    continue;
                }
                Err(err) => {
                    error!(job_id = %id, error = %err, "Store error while claiming; job re-admitted");
                    self.queue.lock().await.enqueue(
                        id,
                        ready.priority,
                        ready.created_at,
                        HashSet::new(),
                    );
                    return None;
                }
            }
        }
    }

    /// Spawn one execution attempt onto the runtime. The permit is
    /// released when the attempt settles, never earlier.
    pub(crate) fn spawn_attempt(self: &Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_attempt(job).await;
            drop(permit);
        });
    }

    async fn run_attempt(self: &Arc<Self>, job: Job) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.insert(job.id, cancel_tx);
        let ctx = JobContext::new(job.id, job.session_id, cancel_rx, Arc::clone(self));

        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            attempt = job.metadata.retry_count + 1,
            "Executing job"
        );

        // A panicking handler must not take the dispatch loop down
        // with it; it is treated like a transient failure.
        let outcome = AssertUnwindSafe(self.executor.execute(&job, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(JobExecutionError::Transient(
                    "job handler panicked".to_string(),
                ))
            });

        let cancel_requested = self
            .cancels
            .remove(&job.id)
            .map(|(_, tx)| *tx.borrow())
            .unwrap_or(false);

        match outcome {
            Ok(output) => self.finish_completed(&job, output, cancel_requested).await,
            Err(JobExecutionError::Cancelled) => self.finish_cancelled(&job).await,
            Err(JobExecutionError::Permanent(msg)) => {
                self.finish_failed(&job, msg, "permanent").await
            }
            Err(JobExecutionError::Internal(err)) => {
                self.finish_failed(&job, err.to_string(), "internal").await
            }
            Err(JobExecutionError::Transient(msg)) => self.handle_transient(&job, msg).await,
        }
    }

    async fn finish_completed(&self, job: &Job, output: Option<Value>, cancel_requested: bool) {
        let mut patch = JobPatch {
            expect_status: Some(JobStatus::Processing),
            status: Some(JobStatus::Completed),
            output: Some(output.unwrap_or(Value::Null)),
            progress: Some(JobProgress::finished()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if cancel_requested {
            patch.push_log = Some(JobLogEntry::new(
                LogLevel::Warn,
                "cancellation requested but the attempt ran to completion",
            ));
        }

        match self.store.update(job.id, patch).await {
            Ok(updated) => {
                info!(job_id = %job.id, "Job completed");
                self.emit(&updated, JobEventKind::Completed, json!({})).await;

                let unblocked = { self.queue.lock().await.resolve_dependency(job.id) };
                if unblocked > 0 {
                    debug!(job_id = %job.id, unblocked, "Dependent jobs unblocked");
                    self.wake.notify_one();
                }
            }
            Err(err) if err.kind == ErrorKind::Conflict => {
                debug!(job_id = %job.id, "Job settled elsewhere, completion result discarded")
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Failed to record job completion")
            }
        }
    }

    async fn finish_cancelled(&self, job: &Job) {
        let patch = JobPatch {
            expect_status: Some(JobStatus::Processing),
            status: Some(JobStatus::Cancelled),
            completed_at: Some(Utc::now()),
            push_log: Some(JobLogEntry::new(
                LogLevel::Info,
                "attempt aborted at cancellation checkpoint",
            )),
            ..Default::default()
        };
        match self.store.update(job.id, patch).await {
            Ok(updated) => {
                info!(job_id = %job.id, "Job cancelled during execution");
                self.emit(&updated, JobEventKind::Cancelled, json!({ "was": "processing" }))
                    .await;
            }
            Err(err) if err.kind == ErrorKind::Conflict => {
                debug!(job_id = %job.id, "Job settled elsewhere, cancellation already recorded")
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Failed to record job cancellation")
            }
        }
    }

    async fn finish_failed(&self, job: &Job, message: String, code: &str) {
        let patch = JobPatch {
            expect_status: Some(JobStatus::Processing),
            status: Some(JobStatus::Failed),
            completed_at: Some(Utc::now()),
            push_error: Some(JobError::new(message.clone()).with_code(code)),
            ..Default::default()
        };
        match self.store.update(job.id, patch).await {
            Ok(updated) => {
                error!(job_id = %job.id, error = %message, "Job failed");
                self.emit(&updated, JobEventKind::Failed, json!({ "error": message }))
                    .await;
            }
            Err(err) if err.kind == ErrorKind::Conflict => {
                debug!(job_id = %job.id, "Job settled elsewhere, failure result discarded")
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Failed to record job failure")
            }
        }
    }

    async fn handle_transient(self: &Arc<Self>, job: &Job, message: String) {
        match self.retries.decide(
            job.job_type,
            job.metadata.retry_count,
            job.metadata.max_retries,
        ) {
            RetryDecision::GiveUp => {
                self.finish_failed(job, format!("{message} (retries exhausted)"), "transient")
                    .await;
            }
            RetryDecision::Retry { delay } => {
                let new_count = job.metadata.retry_count + 1;
                let patch = JobPatch {
                    expect_status: Some(JobStatus::Processing),
                    status: Some(JobStatus::Pending),
                    retry_count: Some(new_count),
                    progress: Some(JobProgress::default()),
                    assigned_worker: Some(None),
                    push_error: Some(JobError::new(message.clone()).with_code("transient")),
                    ..Default::default()
                };
                match self.store.update(job.id, patch).await {
                    Ok(updated) => {
                        warn!(
                            job_id = %job.id,
                            retry_count = new_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Transient failure, retry scheduled"
                        );
                        self.emit(
                            &updated,
                            JobEventKind::RetryScheduled,
                            json!({
                                "retry_count": new_count,
                                "delay_ms": delay.as_millis() as u64,
                            }),
                        )
                        .await;
                        self.schedule_requeue(updated, delay);
                    }
                    Err(err) if err.kind == ErrorKind::Conflict => {
                        debug!(job_id = %job.id, "Job settled elsewhere, retry abandoned")
                    }
                    Err(err) => {
                        error!(job_id = %job.id, error = %err, "Failed to record retry; finalizing as failed");
                        self.finish_failed(job, message, "transient").await;
                    }
                }
            }
        }
    }

    /// Re-admit a retrying job once its backoff elapses. The job may
    /// settle differently in the meantime (cancelled, deleted); only a
    /// still-pending record goes back into the queue. Store failures
    /// are retried after another backoff period rather than silently
    /// dropping the job or misreading its dependencies as resolved.
    fn schedule_requeue(self: &Arc<Self>, job: Job, delay: Duration) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;

                let current = match service.store.get(job.id).await {
                    Ok(Some(current)) => current,
                    Ok(None) => {
                        debug!(job_id = %job.id, "Skipping re-admission, job deleted");
                        return;
                    }
                    Err(err) => {
                        error!(job_id = %job.id, error = %err, "Store error during re-admission, retrying after backoff");
                        continue;
                    }
                };
                if current.status != JobStatus::Pending {
                    debug!(job_id = %job.id, "Skipping re-admission, job no longer pending");
                    return;
                }

                let waiting_on = match service
                    .unresolved_deps(&current.metadata.dependencies)
                    .await
                {
                    Ok(waiting_on) => waiting_on,
                    Err(err) => {
                        error!(job_id = %job.id, error = %err, "Store error resolving dependencies, retrying after backoff");
                        continue;
                    }
                };

                service.queue.lock().await.enqueue(
                    current.id,
                    current.priority,
                    current.created_at,
                    waiting_on,
                );
                service.wake.notify_one();
                return;
            }
        });
    }

    async fn unresolved_deps(&self, deps: &[JobId]) -> AppResult<HashSet<JobId>> {
        let mut unresolved = HashSet::new();
        for dep in deps {
            match self.store.get(*dep).await? {
                Some(dep_job) if dep_job.status == JobStatus::Completed => {}
                _ => {
                    unresolved.insert(*dep);
                }
            }
        }
        Ok(unresolved)
    }

    async fn emit(&self, job: &Job, kind: JobEventKind, payload: Value) {
        self.sink
            .publish(JobEvent::new(job.id, job.session_id, kind, payload))
            .await;
    }
}
