//! End-to-end dispatch tests: service + runner over the in-memory
//! store, with real handlers on a real runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};

use taxhub_core::config::queue::QueueConfig;
use taxhub_core::config::retry::{BackoffPolicy, RetryConfig};
use taxhub_core::error::{AppError, ErrorKind};
use taxhub_core::events::{JobEvent, JobEventKind};
use taxhub_core::result::AppResult;
use taxhub_core::traits::EventSink;
use taxhub_core::types::id::{JobId, SessionId};
use taxhub_core::types::pagination::{PageRequest, PageResponse};
use taxhub_entity::job::{
    CreateJob, Job, JobPatch, JobPriority, JobProgress, JobStatus, JobType,
};
use taxhub_notify::BroadcastEventSink;
use taxhub_queue::{
    CancelOutcome, JobContext, JobExecutionError, JobExecutor, JobHandler, JobService,
    RetryOptions, WorkerRunner,
};
use taxhub_store::{JobStore, MemoryJobStore};

/// Completes immediately, recording execution order.
#[derive(Debug)]
struct RecordingHandler {
    job_type: JobType,
    order: Arc<Mutex<Vec<JobId>>>,
    delay: Duration,
}

#[async_trait]
impl JobHandler for RecordingHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(
        &self,
        job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        self.order.lock().unwrap().push(job.id);
        tokio::time::sleep(self.delay).await;
        Ok(Some(json!({ "ok": true })))
    }
}

/// Sleeps in slices, honoring cancellation checkpoints.
#[derive(Debug)]
struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    fn job_type(&self) -> JobType {
        JobType::DocumentProcessing
    }

    async fn execute(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let total_ms = job
            .payload
            .get("sleep_ms")
            .and_then(Value::as_u64)
            .unwrap_or(200);
        let mut elapsed = 0;
        while elapsed < total_ms {
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            elapsed += 10;
        }
        Ok(None)
    }
}

/// Fails transiently for the first `fail_times` attempts.
#[derive(Debug)]
struct FlakyHandler {
    fail_times: u32,
    attempts: AtomicU32,
}

impl FlakyHandler {
    fn failing(fail_times: u32) -> Self {
        Self {
            fail_times,
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    fn job_type(&self) -> JobType {
        JobType::Notification
    }

    async fn execute(
        &self,
        _job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            Err(JobExecutionError::Transient("downstream unavailable".into()))
        } else {
            Ok(Some(json!({ "delivered": true })))
        }
    }
}

/// Fails until the switch is flipped.
#[derive(Debug)]
struct SwitchHandler {
    succeed: Arc<AtomicBool>,
}

#[async_trait]
impl JobHandler for SwitchHandler {
    fn job_type(&self) -> JobType {
        JobType::FormGeneration
    }

    async fn execute(
        &self,
        _job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        if self.succeed.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Err(JobExecutionError::Transient("template store offline".into()))
        }
    }
}

/// Panics on every attempt.
#[derive(Debug)]
struct PanicHandler;

#[async_trait]
impl JobHandler for PanicHandler {
    fn job_type(&self) -> JobType {
        JobType::ReportGeneration
    }

    async fn execute(
        &self,
        _job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        panic!("report renderer crashed");
    }
}

/// Tracks how many attempts overlap.
#[derive(Debug)]
struct OverlapTracker {
    current: AtomicUsize,
    max_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for OverlapTracker {
    fn job_type(&self) -> JobType {
        JobType::Backup
    }

    async fn execute(
        &self,
        _job: &Job,
        _ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Store wrapper that fails a set number of upcoming reads or writes
/// with a storage error, then recovers.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryJobStore,
    failing_gets: AtomicU32,
    failing_updates: AtomicU32,
}

impl FlakyStore {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert(&self, job: Job) -> AppResult<()> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: JobId) -> AppResult<Option<Job>> {
        if Self::take(&self.failing_gets) {
            return Err(AppError::storage("record store offline"));
        }
        self.inner.get(id).await
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> AppResult<Job> {
        if Self::take(&self.failing_updates) {
            return Err(AppError::storage("record store offline"));
        }
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        self.inner.delete(id).await
    }

    async fn list_by_session(
        &self,
        session_id: SessionId,
        status: Option<JobStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Job>> {
        self.inner.list_by_session(session_id, status, page).await
    }

    async fn list_by_status(&self, status: JobStatus) -> AppResult<Vec<Job>> {
        self.inner.list_by_status(status).await
    }

    async fn count_by_status(&self) -> AppResult<HashMap<JobStatus, u64>> {
        self.inner.count_by_status().await
    }

    async fn count_by_type(&self) -> AppResult<HashMap<JobType, u64>> {
        self.inner.count_by_type().await
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.inner.delete_terminal_older_than(cutoff).await
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    sink: Arc<BroadcastEventSink>,
    service: Arc<JobService>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    fn new(max_concurrent: usize, executor: JobExecutor) -> Self {
        Self::with_store(Arc::new(MemoryJobStore::new()), max_concurrent, executor)
    }

    fn with_store(
        store: Arc<MemoryJobStore>,
        max_concurrent: usize,
        executor: JobExecutor,
    ) -> Self {
        let sink = Arc::new(BroadcastEventSink::default());
        let config = QueueConfig {
            max_concurrent_jobs: max_concurrent,
            poll_interval_ms: 10,
            shutdown_grace_seconds: 2,
            ..Default::default()
        };
        let retry = RetryConfig {
            default: BackoffPolicy::Fixed { delay_ms: 10 },
            per_type: Default::default(),
        };
        let service = JobService::new(
            store.clone() as Arc<dyn JobStore>,
            sink.clone() as Arc<dyn EventSink>,
            Arc::new(executor),
            config,
            &retry,
        );
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            sink,
            service,
            shutdown,
        }
    }

    /// Spawn the dispatch loop. Tests create their jobs first when
    /// they need deterministic ordering.
    fn start(&self) {
        let runner = WorkerRunner::new(self.service.clone());
        let rx = self.shutdown.subscribe();
        tokio::spawn(async move { runner.run(rx).await });
    }
}

async fn wait_for_status(service: &Arc<JobService>, id: JobId, status: JobStatus) -> Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = service.get_job(id).await.unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for job {id} to reach {status}"))
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<JobEvent>,
    job_id: JobId,
    kind: JobEventKind,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if event.job_id == job_id && event.kind == kind {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind:?} on job {job_id}"))
}

/// Service plus running dispatch loop over an arbitrary store, for
/// tests that inject store faults.
fn start_over_store(
    store: Arc<dyn JobStore>,
    executor: JobExecutor,
) -> (Arc<JobService>, Arc<BroadcastEventSink>, watch::Sender<bool>) {
    let sink = Arc::new(BroadcastEventSink::default());
    let config = QueueConfig {
        max_concurrent_jobs: 1,
        poll_interval_ms: 10,
        shutdown_grace_seconds: 2,
        ..Default::default()
    };
    let retry = RetryConfig {
        default: BackoffPolicy::Fixed { delay_ms: 10 },
        per_type: Default::default(),
    };
    let service = JobService::new(
        store,
        sink.clone() as Arc<dyn EventSink>,
        Arc::new(executor),
        config,
        &retry,
    );
    let runner = WorkerRunner::new(service.clone());
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(async move { runner.run(rx).await });
    (service, sink, shutdown)
}

fn create(session: SessionId, job_type: JobType) -> CreateJob {
    CreateJob::new(session, job_type)
}

#[tokio::test]
async fn test_priority_order_with_single_slot() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RecordingHandler {
        job_type: JobType::TaxCalculation,
        order: order.clone(),
        delay: Duration::from_millis(20),
    }));
    let h = Harness::new(1, executor);
    let session = SessionId::new();

    let mut low = create(session, JobType::TaxCalculation);
    low.priority = JobPriority::Low;
    let mut normal = create(session, JobType::TaxCalculation);
    normal.priority = JobPriority::Normal;
    let mut high = create(session, JobType::TaxCalculation);
    high.priority = JobPriority::High;

    let low = h.service.create_job(low).await.unwrap();
    let normal = h.service.create_job(normal).await.unwrap();
    let high = h.service.create_job(high).await.unwrap();

    h.start();
    wait_for_status(&h.service, low.id, JobStatus::Completed).await;
    wait_for_status(&h.service, normal.id, JobStatus::Completed).await;
    wait_for_status(&h.service, high.id, JobStatus::Completed).await;

    assert_eq!(*order.lock().unwrap(), vec![high.id, normal.id, low.id]);
}

#[tokio::test]
async fn test_equal_priority_is_fifo() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RecordingHandler {
        job_type: JobType::TaxCalculation,
        order: order.clone(),
        delay: Duration::from_millis(5),
    }));
    let h = Harness::new(1, executor);
    let session = SessionId::new();

    let mut ids = Vec::new();
    for _ in 0..4 {
        let job = h
            .service
            .create_job(create(session, JobType::TaxCalculation))
            .await
            .unwrap();
        ids.push(job.id);
    }

    h.start();
    for id in &ids {
        wait_for_status(&h.service, *id, JobStatus::Completed).await;
    }
    assert_eq!(*order.lock().unwrap(), ids);
}

#[tokio::test]
async fn test_concurrency_ceiling_is_respected() {
    let max_seen = Arc::new(AtomicUsize::new(0));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(OverlapTracker {
        current: AtomicUsize::new(0),
        max_seen: max_seen.clone(),
    }));
    let h = Harness::new(2, executor);
    let session = SessionId::new();

    let mut ids = Vec::new();
    for _ in 0..6 {
        let job = h
            .service
            .create_job(create(session, JobType::Backup))
            .await
            .unwrap();
        ids.push(job.id);
    }

    h.start();
    for id in &ids {
        wait_for_status(&h.service, *id, JobStatus::Completed).await;
    }

    let peak = max_seen.load(Ordering::SeqCst);
    assert!(peak <= 2, "observed {peak} overlapping attempts");
    assert_eq!(peak, 2, "ceiling was never reached");
}

#[tokio::test]
async fn test_transient_failures_exhaust_retry_budget() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::failing(u32::MAX)));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::Notification);
    params.max_retries = 2;
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    let failed = wait_for_status(&h.service, job.id, JobStatus::Failed).await;

    // Initial attempt plus two retries, every failure on record.
    assert_eq!(failed.metadata.retry_count, 2);
    assert_eq!(failed.errors.len(), 3);
    assert!(failed.errors[2].message.contains("retries exhausted"));
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::failing(2)));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::Notification);
    params.max_retries = 3;
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    let done = wait_for_status(&h.service, job.id, JobStatus::Completed).await;

    assert_eq!(done.metadata.retry_count, 2);
    assert_eq!(done.errors.len(), 2, "failed attempts stay on record");
    assert_eq!(done.output, Some(json!({ "delivered": true })));
}

#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(PanicHandler));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::ReportGeneration);
    params.max_retries = 0;
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    let failed = wait_for_status(&h.service, job.id, JobStatus::Failed).await;
    assert!(failed.errors[0].message.contains("panicked"));

    // The dispatch loop survived: a well-behaved job still runs.
    let stats = h.service.queue_stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    // Runner not started: the job stays pending.
    let job = h
        .service
        .create_job(create(SessionId::new(), JobType::DocumentProcessing))
        .await
        .unwrap();

    match h.service.cancel_job(job.id).await.unwrap() {
        CancelOutcome::Cancelled(cancelled) => {
            assert_eq!(cancelled.status, JobStatus::Cancelled);
            assert!(cancelled.completed_at.is_some());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let stats = h.service.queue_stats().await.unwrap();
    assert_eq!(stats.queue_depth, 0);
}

#[tokio::test]
async fn test_cooperative_cancel_of_running_job() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::DocumentProcessing);
    params.payload = json!({ "sleep_ms": 5000 });
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    wait_for_status(&h.service, job.id, JobStatus::Processing).await;

    match h.service.cancel_job(job.id).await.unwrap() {
        CancelOutcome::CancelRequested(_) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    let cancelled = wait_for_status(&h.service, job.id, JobStatus::Cancelled).await;
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.errors.is_empty(), "cancellation is not a failure");
}

#[tokio::test]
async fn test_cancel_of_settled_job_is_a_noop() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::DocumentProcessing);
    params.payload = json!({ "sleep_ms": 10 });
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    let done = wait_for_status(&h.service, job.id, JobStatus::Completed).await;

    match h.service.cancel_job(job.id).await.unwrap() {
        CancelOutcome::NotCancellable(status) => assert_eq!(status, JobStatus::Completed),
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The record is untouched.
    let after = h.service.get_job(job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.completed_at, done.completed_at);
}

#[tokio::test]
async fn test_dependent_job_waits_for_dependency() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RecordingHandler {
        job_type: JobType::TaxCalculation,
        order: order.clone(),
        delay: Duration::from_millis(30),
    }));
    let h = Harness::new(2, executor);
    let session = SessionId::new();

    let dep = h
        .service
        .create_job(create(session, JobType::TaxCalculation))
        .await
        .unwrap();
    let mut gated_params = create(session, JobType::TaxCalculation);
    gated_params.priority = JobPriority::High;
    gated_params.dependencies = vec![dep.id];
    let gated = h.service.create_job(gated_params).await.unwrap();

    h.start();
    wait_for_status(&h.service, gated.id, JobStatus::Completed).await;

    // Both slots were free, but the gated job had to wait anyway.
    assert_eq!(*order.lock().unwrap(), vec![dep.id, gated.id]);
}

#[tokio::test]
async fn test_failed_dependency_keeps_dependent_blocked() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::failing(u32::MAX)));
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(2, executor);
    let session = SessionId::new();

    let mut dep_params = create(session, JobType::Notification);
    dep_params.max_retries = 0;
    let dep = h.service.create_job(dep_params).await.unwrap();

    let mut gated_params = create(session, JobType::DocumentProcessing);
    gated_params.dependencies = vec![dep.id];
    let gated = h.service.create_job(gated_params).await.unwrap();

    h.start();
    wait_for_status(&h.service, dep.id, JobStatus::Failed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Only completion unblocks; a failed dependency gates forever
    // (until it is manually retried to completion).
    let still_pending = h.service.get_job(gated.id).await.unwrap();
    assert_eq!(still_pending.status, JobStatus::Pending);
    let stats = h.service.queue_stats().await.unwrap();
    assert_eq!(stats.blocked, 1);
}

#[tokio::test]
async fn test_unknown_job_type_rejected_at_submission() {
    let executor = JobExecutor::new();
    let h = Harness::new(1, executor);

    let err = h
        .service
        .create_job(create(SessionId::new(), JobType::Other))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_missing_dependency_rejected_at_submission() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::DocumentProcessing);
    params.dependencies = vec![JobId::new()];
    let err = h.service.create_job(params).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_manual_retry_after_exhaustion() {
    let succeed = Arc::new(AtomicBool::new(false));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SwitchHandler {
        succeed: succeed.clone(),
    }));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::FormGeneration);
    params.max_retries = 0;
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    let failed = wait_for_status(&h.service, job.id, JobStatus::Failed).await;
    assert_eq!(failed.metadata.retry_count, 0);

    succeed.store(true, Ordering::SeqCst);
    let retried = h
        .service
        .retry_job(job.id, RetryOptions::default())
        .await
        .unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.metadata.retry_count, 1);
    // Budget raised to keep retry_count <= max_retries.
    assert_eq!(retried.metadata.max_retries, 1);
    assert!(retried.completed_at.is_none());

    let done = wait_for_status(&h.service, job.id, JobStatus::Completed).await;
    assert_eq!(done.errors.len(), 1, "the original failure stays on record");
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_retry_of_non_failed_job_conflicts() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    let job = h
        .service
        .create_job(create(SessionId::new(), JobType::DocumentProcessing))
        .await
        .unwrap();
    let err = h
        .service
        .retry_job(job.id, RetryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_progress_rules() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::DocumentProcessing);
    params.payload = json!({ "sleep_ms": 2000 });
    let job = h.service.create_job(params).await.unwrap();

    // Pending jobs reject progress updates.
    let err = h
        .service
        .update_progress(job.id, JobProgress::at(10, "warming up"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    h.start();
    wait_for_status(&h.service, job.id, JobStatus::Processing).await;

    h.service
        .update_progress(job.id, JobProgress::at(50, "halfway"))
        .await
        .unwrap();

    // Monotone within the attempt.
    let err = h
        .service
        .update_progress(job.id, JobProgress::at(30, "rewinding"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let current = h.service.get_job(job.id).await.unwrap();
    assert_eq!(current.progress.percentage, 50);
}

#[tokio::test]
async fn test_recover_readmits_pending_and_orphaned_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    let session = SessionId::new();

    // Seed the store as a previous process would have left it.
    let pending = Job::from_create(create(session, JobType::TaxCalculation));
    let pending_id = pending.id;
    store.insert(pending).await.unwrap();

    let orphan = Job::from_create(create(session, JobType::TaxCalculation));
    let orphan_id = orphan.id;
    store.insert(orphan).await.unwrap();
    store
        .update(orphan_id, JobPatch::status(JobStatus::Processing))
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RecordingHandler {
        job_type: JobType::TaxCalculation,
        order: order.clone(),
        delay: Duration::from_millis(5),
    }));
    let h = Harness::with_store(store, 2, executor);

    let admitted = h.service.recover().await.unwrap();
    assert_eq!(admitted, 2);

    h.start();
    wait_for_status(&h.service, pending_id, JobStatus::Completed).await;
    let recovered = wait_for_status(&h.service, orphan_id, JobStatus::Completed).await;
    assert!(recovered
        .logs
        .iter()
        .any(|l| l.message.contains("unclean shutdown")));
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);
    let mut events = h.sink.subscribe();

    let mut params = create(SessionId::new(), JobType::DocumentProcessing);
    params.payload = json!({ "sleep_ms": 10 });
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    wait_for_status(&h.service, job.id, JobStatus::Completed).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id == job.id {
            kinds.push(event.kind);
        }
    }
    assert_eq!(
        kinds,
        vec![
            JobEventKind::Created,
            JobEventKind::Started,
            JobEventKind::Completed,
        ]
    );
}

#[tokio::test]
async fn test_delete_requires_terminal_state() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);

    let job = h
        .service
        .create_job(create(SessionId::new(), JobType::DocumentProcessing))
        .await
        .unwrap();

    let err = h.service.delete_job(job.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    h.service.cancel_job(job.id).await.unwrap();
    h.service.delete_job(job.id).await.unwrap();
    let err = h.service.get_job(job.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_update_status_follows_state_machine() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SleepHandler));
    let h = Harness::new(1, executor);
    let session = SessionId::new();

    // Runner not started: transitions are driven through the API.
    let job = h
        .service
        .create_job(create(session, JobType::DocumentProcessing))
        .await
        .unwrap();

    // pending -> completed skips processing and is rejected.
    let err = h
        .service
        .update_status(job.id, JobStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    let processing = h
        .service
        .update_status(job.id, JobStatus::Processing)
        .await
        .unwrap();
    assert_eq!(processing.status, JobStatus::Processing);
    assert!(processing.started_at.is_some());
    // The transition also claims the queue entry.
    let stats = h.service.queue_stats().await.unwrap();
    assert_eq!(stats.queue_depth, 0);

    let done = h
        .service
        .update_status(job.id, JobStatus::Completed)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.progress.percentage, 100);

    // Terminal states accept no further transitions.
    let err = h
        .service
        .update_status(job.id, JobStatus::Processing)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    // -> cancelled routes through cancellation.
    let other = h
        .service
        .create_job(create(session, JobType::DocumentProcessing))
        .await
        .unwrap();
    let cancelled = h
        .service
        .update_status(other.id, JobStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
}

#[tokio::test]
async fn test_update_status_failed_to_pending_readmits() {
    let succeed = Arc::new(AtomicBool::new(false));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SwitchHandler {
        succeed: succeed.clone(),
    }));
    let h = Harness::new(1, executor);

    let mut params = create(SessionId::new(), JobType::FormGeneration);
    params.max_retries = 0;
    let job = h.service.create_job(params).await.unwrap();

    h.start();
    wait_for_status(&h.service, job.id, JobStatus::Failed).await;

    // failed -> pending behaves like a manual retry.
    succeed.store(true, Ordering::SeqCst);
    let readmitted = h
        .service
        .update_status(job.id, JobStatus::Pending)
        .await
        .unwrap();
    assert_eq!(readmitted.status, JobStatus::Pending);
    assert_eq!(readmitted.metadata.retry_count, 1);

    wait_for_status(&h.service, job.id, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_settled_job_result_is_discarded() {
    // A handler that ignores the cooperative signal finishes after its
    // job has already settled; the late result must not overwrite the
    // terminal state.
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RecordingHandler {
        job_type: JobType::TaxCalculation,
        order: Arc::new(Mutex::new(Vec::new())),
        delay: Duration::from_millis(100),
    }));
    let h = Harness::new(1, executor);

    let job = h
        .service
        .create_job(create(SessionId::new(), JobType::TaxCalculation))
        .await
        .unwrap();
    h.start();
    wait_for_status(&h.service, job.id, JobStatus::Processing).await;

    // Settle the record out from under the running attempt.
    h.store
        .update(
            job.id,
            JobPatch {
                expect_status: Some(JobStatus::Processing),
                status: Some(JobStatus::Cancelled),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = h.service.get_job(job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert!(after.output.is_none(), "late completion was recorded");
}

#[tokio::test]
async fn test_claim_failure_readmits_job() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RecordingHandler {
        job_type: JobType::TaxCalculation,
        order: order.clone(),
        delay: Duration::from_millis(5),
    }));

    let store = Arc::new(FlakyStore::default());
    // The first claim's write fails; the job must go back into the
    // queue and be claimed on the next dispatch pass.
    store.failing_updates.store(1, Ordering::SeqCst);
    let (service, _sink, _shutdown) = start_over_store(store.clone(), executor);

    let job = service
        .create_job(create(SessionId::new(), JobType::TaxCalculation))
        .await
        .unwrap();

    let done = wait_for_status(&service, job.id, JobStatus::Completed).await;
    assert_eq!(done.output, Some(json!({ "ok": true })));
    assert_eq!(*order.lock().unwrap(), vec![job.id]);
}

#[tokio::test]
async fn test_backoff_readmission_retries_on_store_failure() {
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(FlakyHandler::failing(1)));

    let store = Arc::new(FlakyStore::default());
    let (service, sink, _shutdown) = start_over_store(store.clone(), executor);
    let mut events = sink.subscribe();

    let mut params = create(SessionId::new(), JobType::Notification);
    params.max_retries = 2;
    let job = service.create_job(params).await.unwrap();

    wait_for_event(&mut events, job.id, JobEventKind::RetryScheduled).await;

    // The re-admission task rides out store failures instead of
    // dropping the job or misreading its dependencies as resolved.
    store.failing_gets.store(2, Ordering::SeqCst);

    wait_for_event(&mut events, job.id, JobEventKind::Completed).await;
    let done = service.get_job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.metadata.retry_count, 1);
}
