//! Wires `docindex-scheduler`'s [`JobExecutor`] to the scraper/content/store
//! crates, generalizing `contextbuilder_core::pipeline::add_kb`'s
//! discover → crawl → convert → store phase sequence into one job-execution
//! step driven by the scheduler instead of a one-shot CLI invocation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use docindex_content::{Body, ContentType, PipelineOptions};
use docindex_scraper::executor::ExecutorOptions;
use docindex_scraper::{JobCtx, JobMode, KnownPage, ScrapeInput, ScraperOptions, StrategyRegistry};
use docindex_shared::{AppConfig, DocIndexError, JobKind, JobRecord, Result, VersionStatus};
use docindex_store::{NewChunk, PageDocuments, Storage};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;

use docindex_scheduler::{JobExecutor, JobHandle};

/// What `ScrapeService::enqueue_scrape` persists as a job's
/// `options_snapshot`, so a later dispatch (or an interrupted-job recovery)
/// can reconstruct exactly what the job was asked to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeEnvelope {
    pub input: ScrapeInput,
    pub options: ScraperOptions,
}

pub struct PipelineExecutor {
    storage: Arc<Storage>,
    registry: StrategyRegistry,
    app_config: AppConfig,
}

impl PipelineExecutor {
    pub fn new(storage: Arc<Storage>, app_config: AppConfig) -> Self {
        Self { storage, registry: StrategyRegistry::new(), app_config }
    }

    async fn execute_remove_version(&self, job: &JobRecord, handle: &JobHandle) -> Result<()> {
        handle.report_progress(0, Some(1)).await?;
        let summary = self.storage.remove_version(&job.library, &job.version, true).await?;
        info!(
            library = %job.library,
            version = %job.version,
            documents_deleted = summary.documents_deleted,
            pages_deleted = summary.pages_deleted,
            "removed version"
        );
        handle.report_progress(1, Some(1)).await?;
        Ok(())
    }

    async fn execute_scrape_or_refresh(&self, job: &JobRecord, handle: &JobHandle) -> Result<()> {
        let envelope: ScrapeEnvelope = serde_json::from_value(job.options_snapshot.clone())
            .map_err(|e| DocIndexError::job(format!("corrupt job options snapshot: {e}")))?;

        let version_id = self.storage.resolve_version_id(&job.library, &job.version).await?;
        let running_status = match job.kind {
            JobKind::Refresh => VersionStatus::Updating,
            _ => VersionStatus::Running,
        };
        self.storage.set_version_status(version_id, running_status, None, None, None).await?;

        let mode = if matches!(job.kind, JobKind::Refresh) {
            let known = self
                .storage
                .list_pages(version_id)
                .await?
                .into_iter()
                .filter_map(|p| Url::parse(&p.url).ok().map(|url| KnownPage { url, etag: p.etag, last_modified: p.last_modified }))
                .collect();
            JobMode::Refresh { known }
        } else {
            JobMode::Scrape
        };

        let strategy = self.registry.resolve(&envelope.input)?;
        let ctx = Arc::new(JobCtx {
            input: envelope.input.clone(),
            options: envelope.options.clone(),
            mode,
            cancellation: handle.cancellation(),
            git_default_branch: tokio::sync::OnceCell::new(),
        });
        let exec_opts = ExecutorOptions::from(&envelope.options);

        let result = docindex_scraper::executor::run(strategy, ctx, &exec_opts).await?;

        let total = result.fetched.len() as u64;
        let mut done = 0u64;
        let mut visited: HashSet<String> = HashSet::new();

        for page in &result.fetched {
            visited.insert(page.url.to_string());

            let content_type = ContentType::from_mime(&page.content_type);
            let pipeline_options = PipelineOptions {
                render_mode: docindex_content::RenderMode::Never,
                sanitize_selectors: Vec::new(),
                sanitize_safety_threshold: 0.6,
                splitter: self.app_config.splitter.clone(),
            };
            let processed = docindex_content::process(page.url.clone(), Body::Bytes(page.body.clone()), content_type, pipeline_options).await?;

            let chunks = processed
                .chunks
                .into_iter()
                .map(|c| NewChunk { content: c.content, metadata: c.metadata, embedding: None })
                .collect();

            let doc = PageDocuments {
                url: page.url.to_string(),
                title: processed.title,
                content_type: page.content_type.clone(),
                etag: page.etag.clone(),
                last_modified: page.last_modified.clone(),
                depth: page.depth,
                chunks,
            };
            self.storage.add_documents(version_id, &doc).await?;

            done += 1;
            handle.report_progress(done, Some(total)).await?;
            if handle.is_cancelled() {
                break;
            }
        }

        for url in &result.not_modified {
            visited.insert(url.to_string());
        }
        for url in &result.removed {
            if let Some(page_id) = self.storage.find_page_id(version_id, url.as_str()).await? {
                self.storage.delete_page(page_id).await?;
            }
        }

        // Refresh-only: a page that was neither (re)fetched, left
        // not-modified, nor explicitly removed fell out of link-discovery
        // scope entirely — prune it too, generalizing
        // `contextbuilder_core::update::diff_pages`'s "removed" category onto
        // conditional-fetch refresh. Skipped on a cancelled run: the crawl
        // didn't reach everywhere it would have, so "unvisited" doesn't mean
        // "gone".
        if matches!(job.kind, JobKind::Refresh) && !result.cancelled {
            for page in self.storage.list_pages(version_id).await? {
                let already_removed = result.removed.iter().any(|u| u.as_str() == page.url);
                if !visited.contains(&page.url) && !already_removed {
                    self.storage.delete_page(page.id).await?;
                }
            }
        }

        if !envelope.options.ignore_errors && !result.errors.is_empty() {
            let (url, message) = &result.errors[0];
            warn!(url = %url, error = %message, "fatal page error, terminating job");
            self.storage
                .set_version_status(version_id, VersionStatus::Failed, Some(done), Some(total), Some(message))
                .await?;
            return Err(DocIndexError::job(format!("{} page(s) failed, first: {message}", result.errors.len())));
        }

        if result.cancelled || handle.is_cancelled() {
            self.storage.set_version_status(version_id, VersionStatus::Cancelled, Some(done), Some(total), None).await?;
            return Ok(());
        }

        self.storage.set_version_status(version_id, VersionStatus::Completed, Some(done), Some(total), None).await?;
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for PipelineExecutor {
    #[instrument(skip(self, handle), fields(job_id = %job.id, kind = %job.kind, library = %job.library, version = %job.version))]
    async fn execute(&self, job: &JobRecord, handle: &JobHandle) -> Result<()> {
        match job.kind {
            JobKind::RemoveVersion => self.execute_remove_version(job, handle).await,
            JobKind::Scrape | JobKind::Refresh => self.execute_scrape_or_refresh(job, handle).await,
        }
    }
}
