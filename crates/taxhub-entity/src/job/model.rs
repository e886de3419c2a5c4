//! Job entity model, creation parameters, and atomic patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taxhub_core::types::id::{JobId, SessionId, UserId};

use super::kind::JobType;
use super::log::{JobError, JobLogEntry};
use super::progress::JobProgress;
use super::status::{JobPriority, JobStatus};

/// Scheduling and bookkeeping metadata attached to a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    /// User who created the job.
    pub created_by: Option<UserId>,
    /// Worker that claimed the job for its current/last attempt.
    pub assigned_worker: Option<String>,
    /// Number of retries performed so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Jobs that must complete before this one becomes eligible.
    pub dependencies: Vec<JobId>,
    /// Parent job, when this job was spawned by another.
    pub parent_job_id: Option<JobId>,
    /// Jobs spawned by this one.
    pub child_job_ids: Vec<JobId>,
}

/// A unit of asynchronous work tracked through its status lifecycle.
///
/// The job record store is the single source of truth for this document;
/// the in-memory priority queue only ever holds job identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, immutable once assigned.
    pub id: JobId,
    /// Owning filing session; used for access control and filtering.
    pub session_id: SessionId,
    /// What kind of work this is.
    pub job_type: JobType,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Scheduling priority.
    pub priority: JobPriority,
    /// Job-type-specific input payload.
    pub payload: serde_json::Value,
    /// Handler result, set on completion.
    pub output: Option<serde_json::Value>,
    /// Execution progress.
    pub progress: JobProgress,
    /// Scheduling metadata.
    pub metadata: JobMetadata,
    /// Failure records, appended across retries. Never cleared.
    pub errors: Vec<JobError>,
    /// Execution log lines, append-only.
    pub logs: Vec<JobLogEntry>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
    /// When the first processing attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a pending job from creation parameters.
    pub fn from_create(params: CreateJob) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            session_id: params.session_id,
            job_type: params.job_type,
            status: JobStatus::Pending,
            priority: params.priority,
            payload: params.payload,
            output: None,
            progress: JobProgress::default(),
            metadata: JobMetadata {
                created_by: params.created_by,
                assigned_worker: None,
                retry_count: 0,
                max_retries: params.max_retries,
                tags: params.tags,
                dependencies: params.dependencies,
                parent_job_id: params.parent_job_id,
                child_job_ids: Vec::new(),
            },
            errors: Vec::new(),
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the automatic retry budget allows another attempt.
    pub fn can_auto_retry(&self) -> bool {
        self.metadata.retry_count < self.metadata.max_retries
    }
}

/// Parameters for creating a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    /// Owning session.
    pub session_id: SessionId,
    /// Kind of work.
    pub job_type: JobType,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: JobPriority,
    /// Job-type-specific input payload.
    pub payload: serde_json::Value,
    /// Retry budget.
    pub max_retries: u32,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Jobs that must complete before this one runs.
    #[serde(default)]
    pub dependencies: Vec<JobId>,
    /// Parent job, when spawned by another job.
    #[serde(default)]
    pub parent_job_id: Option<JobId>,
    /// User who requested the job.
    #[serde(default)]
    pub created_by: Option<UserId>,
}

impl CreateJob {
    /// Minimal creation parameters for a job with an empty payload.
    pub fn new(session_id: SessionId, job_type: JobType) -> Self {
        Self {
            session_id,
            job_type,
            priority: JobPriority::Normal,
            payload: serde_json::Value::Null,
            max_retries: 3,
            tags: Vec::new(),
            dependencies: Vec::new(),
            parent_job_id: None,
            created_by: None,
        }
    }
}

/// A partial update applied atomically to a job record.
///
/// The store applies the whole patch under the record's entry lock so a
/// progress update can never interleave with a status transition.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    /// Required current status. The store rejects the patch with a
    /// conflict when the record's status differs, checked under the
    /// same entry lock that applies the patch. This is what makes
    /// concurrent transition attempts (cancel vs. claim, finish vs.
    /// cancel) race-free.
    pub expect_status: Option<JobStatus>,
    /// New status.
    pub status: Option<JobStatus>,
    /// New priority (manual retry override).
    pub priority: Option<JobPriority>,
    /// Handler result.
    pub output: Option<serde_json::Value>,
    /// Progress replacement.
    pub progress: Option<JobProgress>,
    /// Worker assignment (`Some(None)` clears it).
    pub assigned_worker: Option<Option<String>>,
    /// New retry count.
    pub retry_count: Option<u32>,
    /// Raised retry budget (manual retry of an exhausted job).
    pub max_retries: Option<u32>,
    /// First-attempt start time. Only applied if not already set.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Clear the terminal timestamp (manual retry re-opens the job).
    pub clear_completed_at: bool,
    /// Failure record to append.
    pub push_error: Option<JobError>,
    /// Log line to append.
    pub push_log: Option<JobLogEntry>,
    /// Child job to register on this (parent) job.
    pub push_child: Option<JobId>,
}

impl JobPatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only transitions status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Apply this patch to a job, bumping `updated_at`.
    ///
    /// `started_at` and `completed_at` are set-once: a patch cannot
    /// overwrite an existing value. `expect_status` is not applied
    /// here; the store enforces it before calling `apply`.
    pub fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(priority) = self.priority {
            job.priority = priority;
        }
        if let Some(output) = self.output {
            job.output = Some(output);
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(worker) = self.assigned_worker {
            job.metadata.assigned_worker = worker;
        }
        if let Some(count) = self.retry_count {
            job.metadata.retry_count = count;
        }
        if let Some(max) = self.max_retries {
            job.metadata.max_retries = max;
        }
        if let Some(ts) = self.started_at {
            job.started_at.get_or_insert(ts);
        }
        if self.clear_completed_at {
            job.completed_at = None;
        }
        if let Some(ts) = self.completed_at {
            job.completed_at.get_or_insert(ts);
        }
        if let Some(err) = self.push_error {
            job.errors.push(err);
        }
        if let Some(line) = self.push_log {
            job.logs.push(line);
        }
        if let Some(child) = self.push_child {
            job.metadata.child_job_ids.push(child);
        }
        job.updated_at = Utc::now();
    }
}
