//! Durable job scheduler (spec.md §4.6): generalizes the teacher's one-shot
//! `add_kb`/`update_kb` pipelines into a persisted, concurrency-bounded queue
//! of `scrape`/`refresh`/`remove_version` jobs.
//!
//! This crate knows nothing about scrapers or content pipelines — it owns
//! job bookkeeping (dedup, persistence, status machine, recovery, the event
//! bus) and drives whatever [`JobExecutor`] the caller registers. The actual
//! scrape/refresh/remove-version work is wired in by `docindex-core`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use docindex_shared::{DocId, DocIndexError, JobKind, JobRecord, JobStatus, Result, SchedulerSection};
use docindex_store::{JobFilter, Storage};
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Events emitted to [`Scheduler::subscribe`] (spec.md §4.6: `JOB_LIST_CHANGE`,
/// `JOB_PROGRESS`, `JOB_STATUS`).
#[derive(Debug, Clone)]
pub enum JobEvent {
    JobListChange,
    JobProgress { id: DocId, done: u64, max: Option<u64> },
    JobStatus { id: DocId, status: JobStatus },
}

/// What a [`JobExecutor`] uses to report progress and observe cancellation
/// while a job runs. Wraps the scheduler's storage handle and cancellation
/// token so the executor never has to manage job bookkeeping itself.
pub struct JobHandle {
    storage: Arc<Storage>,
    job_id: DocId,
    cancel: CancellationToken,
    events: broadcast::Sender<JobEvent>,
}

impl JobHandle {
    pub fn job_id(&self) -> DocId {
        self.job_id
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records progress (spec.md §5: callers must only ever increase `done`
    /// within one job; the scheduler doesn't enforce this itself).
    pub async fn report_progress(&self, done: u64, max: Option<u64>) -> Result<()> {
        self.storage.set_job_progress(self.job_id, done, max).await?;
        let _ = self.events.send(JobEvent::JobProgress { id: self.job_id, done, max });
        Ok(())
    }
}

/// The work a job actually performs, supplied by `docindex-core`. Errors
/// returned here become the job's terminal `failed` error message.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobRecord, handle: &JobHandle) -> Result<()>;
}

fn running_status(kind: JobKind) -> JobStatus {
    match kind {
        JobKind::Refresh => JobStatus::Updating,
        JobKind::Scrape | JobKind::RemoveVersion => JobStatus::Running,
    }
}

/// Persisted, concurrency-bounded job queue.
pub struct Scheduler {
    storage: Arc<Storage>,
    executor: Arc<dyn JobExecutor>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<JobEvent>,
    notify: Arc<Notify>,
    cancellations: Mutex<HashMap<DocId, CancellationToken>>,
    resume_interrupted_scrapes: bool,
}

impl Scheduler {
    /// Builds the scheduler and starts its dispatch loop as a background
    /// task. Call [`recover_on_startup`](Self::recover_on_startup) once
    /// afterward before enqueuing new work.
    pub fn spawn(storage: Arc<Storage>, config: &SchedulerSection, executor: Arc<dyn JobExecutor>) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(256);
        let scheduler = Arc::new(Self {
            storage,
            executor,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1) as usize)),
            events,
            notify: Arc::new(Notify::new()),
            cancellations: Mutex::new(HashMap::new()),
            resume_interrupted_scrapes: config.resume_interrupted_scrapes,
        });

        let dispatcher = scheduler.clone();
        tokio::spawn(async move { dispatcher.dispatch_loop().await });
        scheduler
    }

    /// Adopts jobs left in a non-terminal state by a prior process (spec.md
    /// §4.6). `running`/`updating` refresh and remove-version jobs are
    /// idempotent to redo, so they're simply re-queued. An interrupted
    /// `scrape` is *not* silently resumed by default — it's surfaced as
    /// `failed` so the caller decides whether to resubmit — unless
    /// `scheduler.resumeInterruptedScrapes` opts back in.
    #[instrument(skip(self))]
    pub async fn recover_on_startup(&self) -> Result<()> {
        let pending = self.storage.list_unterminated_jobs().await?;
        let mut changed = false;

        for job in pending {
            if job.status == JobStatus::Queued {
                continue;
            }
            changed = true;

            match job.kind {
                JobKind::Refresh | JobKind::RemoveVersion => {
                    info!(job_id = %job.id, kind = %job.kind, "re-queuing interrupted job");
                    self.storage.set_job_status(job.id, JobStatus::Queued, None).await?;
                }
                JobKind::Scrape if self.resume_interrupted_scrapes => {
                    info!(job_id = %job.id, "re-queuing interrupted scrape (resumeInterruptedScrapes enabled)");
                    self.storage.set_job_status(job.id, JobStatus::Queued, None).await?;
                }
                JobKind::Scrape => {
                    warn!(job_id = %job.id, "interrupted scrape surfaced as failed, not silently resumed");
                    self.storage
                        .set_job_status(job.id, JobStatus::Failed, Some("interrupted at startup, resubmit to retry"))
                        .await?;
                }
            }
        }

        if changed {
            self.emit(JobEvent::JobListChange);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub async fn enqueue_scrape(&self, library: &str, version: &str, source_url: &str, options_snapshot: serde_json::Value) -> Result<DocId> {
        self.enqueue(JobKind::Scrape, library, version, source_url, options_snapshot).await
    }

    pub async fn enqueue_refresh(&self, library: &str, version: &str, source_url: &str, options_snapshot: serde_json::Value) -> Result<DocId> {
        self.enqueue(JobKind::Refresh, library, version, source_url, options_snapshot).await
    }

    pub async fn enqueue_remove_version(&self, library: &str, version: &str) -> Result<DocId> {
        self.enqueue(JobKind::RemoveVersion, library, version, "", serde_json::Value::Null).await
    }

    /// Enqueues a job, or returns the id of an equivalent job already queued
    /// or running (spec.md §4.6 dedup on `(library, version, source_url)`).
    async fn enqueue(&self, kind: JobKind, library: &str, version: &str, source_url: &str, options_snapshot: serde_json::Value) -> Result<DocId> {
        if let Some(existing) = self.storage.find_active_job(library, version, source_url).await? {
            return Ok(existing.id);
        }

        let now = Utc::now();
        let job = JobRecord {
            id: DocId::new(),
            kind,
            library: library.to_string(),
            version: version.to_string(),
            source_url: source_url.to_string(),
            options_snapshot,
            status: JobStatus::Queued,
            progress_done: 0,
            progress_max: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_job(&job).await?;

        self.emit(JobEvent::JobListChange);
        self.notify.notify_one();
        Ok(job.id)
    }

    /// Cancels a job (spec.md §4.6): a still-`queued` job is marked
    /// `cancelled` directly; a running one has its [`CancellationToken`]
    /// tripped so the executor can abort in-flight work.
    pub async fn cancel(&self, id: DocId) -> Result<()> {
        if let Some(token) = self.cancellations.lock().await.get(&id) {
            token.cancel();
            return Ok(());
        }

        if let Some(job) = self.storage.get_job(id).await? {
            if !job.status.is_terminal() {
                self.storage
                    .set_job_status(id, JobStatus::Cancelled, Some("cancelled before it started running"))
                    .await?;
                self.emit(JobEvent::JobStatus { id, status: JobStatus::Cancelled });
                self.emit(JobEvent::JobListChange);
            }
        }
        Ok(())
    }

    /// Resolves on any terminal state, including cancellation (spec.md
    /// §4.6). Never blocks forever: it re-checks storage on every event and
    /// on a lagged receiver, rather than trusting the broadcast channel
    /// alone.
    pub async fn wait_for_job(&self, id: DocId) -> Result<JobRecord> {
        let current = self.storage.get_job(id).await?.ok_or_else(|| DocIndexError::job(format!("unknown job {id}")))?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(JobEvent::JobStatus { id: event_id, status }) if event_id == id && status.is_terminal() => {
                    if let Some(job) = self.storage.get_job(id).await? {
                        return Ok(job);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(job) = self.storage.get_job(id).await? {
                        if job.status.is_terminal() {
                            return Ok(job);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(DocIndexError::job("job event bus closed before job reached a terminal state"));
                }
            }
        }
    }

    pub async fn get_job(&self, id: DocId) -> Result<Option<JobRecord>> {
        self.storage.get_job(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        self.storage.list_jobs(filter).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    /// Claims and spawns as many queued jobs as the concurrency ceiling
    /// allows, each time woken by `notify`. One task, so claiming (flipping
    /// a job's status away from `queued`) is always synchronous with the
    /// scan that found it — no other caller can pick the same job.
    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            self.notify.notified().await;

            loop {
                let permit = match self.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let Some(mut job) = self.next_queued_job().await else {
                    drop(permit);
                    break;
                };

                let status = running_status(job.kind);
                if let Err(e) = self.storage.set_job_status(job.id, status, None).await {
                    warn!(job_id = %job.id, error = %e, "failed to claim queued job, will retry");
                    drop(permit);
                    continue;
                }
                job.status = status;
                self.emit(JobEvent::JobStatus { id: job.id, status });

                let this = self.clone();
                tokio::spawn(async move { this.run_job(job, permit).await });
            }
        }
    }

    async fn next_queued_job(&self) -> Option<JobRecord> {
        let queued = self
            .storage
            .list_jobs(&JobFilter { library: None, status: Some(JobStatus::Queued) })
            .await
            .ok()?;
        queued.into_iter().min_by_key(|j| j.created_at)
    }

    #[instrument(skip(self, permit), fields(job_id = %job.id, kind = %job.kind))]
    async fn run_job(self: Arc<Self>, job: JobRecord, permit: OwnedSemaphorePermit) {
        let cancel = CancellationToken::new();
        self.cancellations.lock().await.insert(job.id, cancel.clone());

        let handle = JobHandle {
            storage: self.storage.clone(),
            job_id: job.id,
            cancel: cancel.clone(),
            events: self.events.clone(),
        };

        let result = self.executor.execute(&job, &handle).await;
        drop(permit);

        let final_status = if cancel.is_cancelled() {
            JobStatus::Cancelled
        } else {
            match &result {
                Ok(()) => JobStatus::Completed,
                Err(_) => JobStatus::Failed,
            }
        };
        let error_message = result.as_ref().err().map(|e| e.to_string());

        if let Err(e) = self.storage.set_job_status(job.id, final_status, error_message.as_deref()).await {
            warn!(job_id = %job.id, error = %e, "failed to persist terminal job status");
        }

        self.cancellations.lock().await.remove(&job.id);
        self.emit(JobEvent::JobStatus { id: job.id, status: final_status });
        self.emit(JobEvent::JobListChange);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_shared::AppConfig;
    use uuid::Uuid;

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("docindex_scheduler_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp, AppConfig::default()).await.expect("open test db"))
    }

    struct SucceedingExecutor;

    #[async_trait]
    impl JobExecutor for SucceedingExecutor {
        async fn execute(&self, _job: &JobRecord, handle: &JobHandle) -> Result<()> {
            handle.report_progress(1, Some(1)).await?;
            Ok(())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        async fn execute(&self, _job: &JobRecord, _handle: &JobHandle) -> Result<()> {
            Err(DocIndexError::job("synthetic failure"))
        }
    }

    struct CancellableExecutor;

    #[async_trait]
    impl JobExecutor for CancellableExecutor {
        async fn execute(&self, _job: &JobRecord, handle: &JobHandle) -> Result<()> {
            handle.cancellation().cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_scrape_completes_successfully() {
        let storage = test_storage().await;
        let scheduler = Scheduler::spawn(storage, &SchedulerSection::default(), Arc::new(SucceedingExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let id = scheduler.enqueue_scrape("react", "18.2.0", "https://react.dev", serde_json::Value::Null).await.unwrap();
        let job = scheduler.wait_for_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_done, 1);
    }

    #[tokio::test]
    async fn enqueue_dedup_returns_existing_job() {
        let storage = test_storage().await;
        let scheduler = Scheduler::spawn(storage, &SchedulerSection::default(), Arc::new(CancellableExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let first = scheduler.enqueue_scrape("react", "18.2.0", "https://react.dev", serde_json::Value::Null).await.unwrap();
        let second = scheduler.enqueue_scrape("react", "18.2.0", "https://react.dev", serde_json::Value::Null).await.unwrap();
        assert_eq!(first, second);

        scheduler.cancel(first).await.unwrap();
        scheduler.wait_for_job(first).await.unwrap();
    }

    #[tokio::test]
    async fn failing_executor_marks_job_failed_with_message() {
        let storage = test_storage().await;
        let scheduler = Scheduler::spawn(storage, &SchedulerSection::default(), Arc::new(FailingExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let id = scheduler.enqueue_scrape("vue", "3.0.0", "https://vuejs.org", serde_json::Value::Null).await.unwrap();
        let job = scheduler.wait_for_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("synthetic failure"));
    }

    #[tokio::test]
    async fn cancel_running_job_marks_it_cancelled() {
        let storage = test_storage().await;
        let scheduler = Scheduler::spawn(storage, &SchedulerSection::default(), Arc::new(CancellableExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let id = scheduler.enqueue_scrape("vue", "3.0.0", "https://vuejs.org", serde_json::Value::Null).await.unwrap();
        // Give the dispatcher a moment to claim and start the job.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        scheduler.cancel(id).await.unwrap();

        let job = scheduler.wait_for_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_queued_job_before_it_starts() {
        let storage = test_storage().await;
        let scheduler = Scheduler::spawn(
            storage,
            &SchedulerSection { max_concurrent_jobs: 1, ..SchedulerSection::default() },
            Arc::new(CancellableExecutor),
        );
        scheduler.recover_on_startup().await.unwrap();

        let blocker = scheduler.enqueue_scrape("vue", "3.0.0", "https://vuejs.org", serde_json::Value::Null).await.unwrap();
        let queued = scheduler.enqueue_scrape("react", "18.2.0", "https://react.dev", serde_json::Value::Null).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        scheduler.cancel(queued).await.unwrap();
        let job = scheduler.get_job(queued).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        scheduler.cancel(blocker).await.unwrap();
        scheduler.wait_for_job(blocker).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_kind_runs_as_updating_status() {
        let storage = test_storage().await;
        let scheduler = Scheduler::spawn(storage, &SchedulerSection::default(), Arc::new(CancellableExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let id = scheduler.enqueue_refresh("react", "18.2.0", "https://react.dev", serde_json::Value::Null).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let job = scheduler.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Updating);

        scheduler.cancel(id).await.unwrap();
        scheduler.wait_for_job(id).await.unwrap();
    }

    #[tokio::test]
    async fn recover_on_startup_fails_interrupted_scrape_by_default() {
        let storage = test_storage().await;
        let job = JobRecord {
            id: DocId::new(),
            kind: JobKind::Scrape,
            library: "react".into(),
            version: "18.2.0".into(),
            source_url: "https://react.dev".into(),
            options_snapshot: serde_json::Value::Null,
            status: JobStatus::Running,
            progress_done: 3,
            progress_max: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        storage.insert_job(&job).await.unwrap();
        storage.set_job_status(job.id, JobStatus::Running, None).await.unwrap();

        let scheduler = Scheduler::spawn(storage.clone(), &SchedulerSection::default(), Arc::new(SucceedingExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let recovered = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert!(recovered.error.unwrap().contains("interrupted"));
    }

    #[tokio::test]
    async fn recover_on_startup_requeues_interrupted_refresh() {
        let storage = test_storage().await;
        let job = JobRecord {
            id: DocId::new(),
            kind: JobKind::Refresh,
            library: "react".into(),
            version: "18.2.0".into(),
            source_url: "https://react.dev".into(),
            options_snapshot: serde_json::Value::Null,
            status: JobStatus::Updating,
            progress_done: 3,
            progress_max: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        storage.insert_job(&job).await.unwrap();
        storage.set_job_status(job.id, JobStatus::Updating, None).await.unwrap();

        let scheduler = Scheduler::spawn(storage.clone(), &SchedulerSection::default(), Arc::new(SucceedingExecutor));
        scheduler.recover_on_startup().await.unwrap();

        let final_job = scheduler.wait_for_job(job.id).await.unwrap();
        assert_eq!(final_job.status, JobStatus::Completed);
    }
}
