//! Thin orchestration crate (spec.md §4.7): wires `docindex-scheduler` to
//! `docindex-scraper`/`docindex-content`/`docindex-store`, exposing exactly
//! the operations of spec.md §6's external interface.
//!
//! Generalizes `contextbuilder_core::pipeline::add_kb`'s one-shot
//! discover → crawl → convert → store sequence into scheduler-driven job
//! execution: the phase order survives in [`executor::PipelineExecutor`],
//! but a scrape is now a durable, cancellable, concurrency-bounded job
//! instead of a single async call.

pub mod executor;
pub mod install;

use std::path::Path;
use std::sync::Arc;

use docindex_scheduler::{JobEvent, Scheduler};
use docindex_scraper::{ScrapeInput, ScraperOptions};
use docindex_shared::{AppConfig, DocId, DocIndexError, JobRecord, Library, Result, Version, VersionStatus};
use docindex_store::{EmbeddingProvider, JobFilter, SearchHit, Storage};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use executor::ScrapeEnvelope;

/// The whole service: persisted storage plus the scheduler driving it.
/// Construct with [`DocIndexService::open`]; everything else is a thin
/// delegation to the held [`Storage`]/[`Scheduler`].
pub struct DocIndexService {
    storage: Arc<Storage>,
    scheduler: Arc<Scheduler>,
}

impl DocIndexService {
    /// Opens (or creates) the database at `db_path`, registers an optional
    /// embedding provider, and starts the scheduler's dispatch loop and
    /// startup recovery pass.
    pub async fn open(db_path: &Path, app_config: AppConfig, embedding_provider: Option<Arc<dyn EmbeddingProvider>>) -> Result<Arc<Self>> {
        let mut storage = Storage::open(db_path, app_config.clone()).await?;
        if let Some(provider) = embedding_provider {
            storage = storage.with_embedding_provider(provider)?;
        }
        let storage = Arc::new(storage);

        let executor = Arc::new(executor::PipelineExecutor::new(storage.clone(), app_config.clone()));
        let scheduler = Scheduler::spawn(storage.clone(), &app_config.scheduler, executor);
        scheduler.recover_on_startup().await?;

        Ok(Arc::new(Self { storage, scheduler }))
    }

    /// Enqueues a new scrape (spec.md §6 `enqueueScrape`). Resolves (and
    /// creates, if new) the `(library, version)` row, persists the resolved
    /// input and options onto it so a later `enqueue_refresh` needs no
    /// arguments, then hands the job to the scheduler.
    pub async fn enqueue_scrape(&self, library: &str, version: &str, input: ScrapeInput, options: ScraperOptions) -> Result<DocId> {
        let version_id = self.storage.resolve_version_id(library, version).await?;

        let snapshot = serde_json::to_value(ScrapeEnvelope { input: input.clone(), options })
            .map_err(|e| DocIndexError::validation(format!("failed to serialize scrape options: {e}")))?;
        self.storage.set_version_source(version_id, &input.display(), &snapshot).await?;
        self.storage.set_version_status(version_id, VersionStatus::Queued, None, None, None).await?;

        self.scheduler.enqueue_scrape(library, version, &input.display(), snapshot).await
    }

    /// Enqueues a refresh of a previously-scraped version (spec.md §6
    /// `enqueueRefresh`), reusing the input/options recorded by its last
    /// scrape. `only_incomplete` skips versions already fully `completed`,
    /// for callers batch-refreshing everything without redoing up-to-date
    /// libraries (SPEC_FULL.md §9 Open Question).
    pub async fn enqueue_refresh(&self, library: &str, version: &str, only_incomplete: bool) -> Result<Option<DocId>> {
        let existing = self.find_version(library, version).await?;
        if only_incomplete && existing.status == VersionStatus::Completed {
            return Ok(None);
        }

        let source_url = existing
            .source_url
            .clone()
            .ok_or_else(|| DocIndexError::validation(format!("{library}@{version} has never been scraped, nothing to refresh")))?;

        let version_id = self.storage.resolve_version_id(library, version).await?;
        self.storage.set_version_status(version_id, VersionStatus::Queued, None, None, None).await?;

        let id = self
            .scheduler
            .enqueue_refresh(library, version, &source_url, existing.scraper_options.clone())
            .await?;
        Ok(Some(id))
    }

    /// Enqueues removal of a version and, if it was the library's last one,
    /// the library itself (spec.md §6 `enqueueRemoveVersion`).
    pub async fn enqueue_remove_version(&self, library: &str, version: &str) -> Result<DocId> {
        self.scheduler.enqueue_remove_version(library, version).await
    }

    pub async fn cancel(&self, id: DocId) -> Result<()> {
        self.scheduler.cancel(id).await
    }

    /// Blocks until the job reaches a terminal state (spec.md §6
    /// `waitForJob`).
    pub async fn wait_for_job(&self, id: DocId) -> Result<JobRecord> {
        self.scheduler.wait_for_job(id).await
    }

    pub async fn get_job(&self, id: DocId) -> Result<Option<JobRecord>> {
        self.scheduler.get_job(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        self.scheduler.list_jobs(filter).await
    }

    /// Subscribes to the job event bus (spec.md §6: SSE-style job
    /// notifications).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    pub async fn list_libraries(&self) -> Result<Vec<Library>> {
        self.storage.list_libraries().await
    }

    pub async fn list_versions(&self, library: &str) -> Result<Vec<Version>> {
        self.storage.list_versions(library).await
    }

    /// Hybrid search returning assembled chunks with score and hierarchy
    /// metadata (spec.md §6 `search`).
    pub async fn search(&self, library: &str, version: &str, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        self.storage.search(library, version, query, limit, true).await
    }

    /// This process's installation id (SPEC_FULL.md §6 persisted state).
    pub fn installation_id(&self) -> Result<Uuid> {
        install::installation_id()
    }

    async fn find_version(&self, library: &str, version: &str) -> Result<Version> {
        self.storage
            .list_versions(library)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| DocIndexError::validation(format!("unknown version {library}@{version}")))
    }
}
