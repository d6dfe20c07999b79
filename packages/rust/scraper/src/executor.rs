//! Strategy-agnostic BFS executor (spec.md §4.4).
//!
//! Generalizes `contextbuilder_crawler::engine::Crawler::crawl`'s
//! batch-drain loop: take up to `concurrency` items off the queue, fetch
//! them concurrently under an `Arc<Semaphore>`, enqueue any links the
//! strategy discovers, repeat until the queue drains or a limit is hit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};
use url::Url;

use docindex_shared::Result;

use crate::scope::{normalize_url, UrlFilter};
use crate::{FetchOutcome, FetchedPage, JobCtx, QueueItem, ScrapeInput, Strategy};

/// Limits the executor enforces regardless of what a strategy seeds.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub max_pages: u64,
    pub max_depth: u32,
    pub concurrency: u32,
}

impl From<&crate::ScraperOptions> for ExecutorOptions {
    fn from(opts: &crate::ScraperOptions) -> Self {
        Self {
            max_pages: opts.max_pages,
            max_depth: opts.max_depth,
            concurrency: opts.concurrency.max(1),
        }
    }
}

/// Summary of one executor run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub fetched: Vec<FetchedPage>,
    pub not_modified: Vec<Url>,
    pub removed: Vec<Url>,
    pub pages_skipped: usize,
    pub errors: Vec<(String, String)>,
    pub duration: Duration,
    pub cancelled: bool,
}

/// Drive `strategy` to completion for one job.
#[instrument(skip_all, fields(strategy = strategy.name()))]
pub async fn run(strategy: Arc<dyn Strategy>, ctx: Arc<JobCtx>, opts: &ExecutorOptions) -> Result<ExecutionResult> {
    let start = Instant::now();

    let filter = scope_filter(&ctx);
    let visited = Arc::new(Mutex::new(HashSet::<String>::new()));
    let semaphore = Arc::new(Semaphore::new(opts.concurrency as usize));

    let mut queue: Vec<QueueItem> = strategy.seed(&ctx).await?;
    let mut result = ExecutionResult::default();

    info!(
        queued = queue.len(),
        max_pages = opts.max_pages,
        max_depth = opts.max_depth,
        concurrency = opts.concurrency,
        "starting scrape"
    );

    while !queue.is_empty() {
        if ctx.is_cancelled() {
            info!("cancellation observed, stopping executor");
            result.cancelled = true;
            break;
        }

        if (result.fetched.len() + result.not_modified.len()) as u64 >= opts.max_pages {
            debug!("max_pages reached, stopping executor");
            break;
        }

        let remaining_budget = opts.max_pages - (result.fetched.len() + result.not_modified.len()) as u64;
        let drain_count = queue.len().min(opts.concurrency as usize).min(remaining_budget as usize).max(1);
        let batch: Vec<QueueItem> = queue.drain(..drain_count).collect();

        let mut handles = Vec::new();

        for item in batch {
            let normalized = normalize_url(&item.url);
            {
                let mut vis = visited.lock().await;
                if vis.contains(&normalized) {
                    result.pages_skipped += 1;
                    continue;
                }
                vis.insert(normalized);
            }

            if let Some(filter) = &filter {
                if !filter.in_scope(&item.url) {
                    debug!(url = %item.url, "out of scope, skipping");
                    result.pages_skipped += 1;
                    continue;
                }
            }

            let strategy = strategy.clone();
            let ctx = ctx.clone();
            let sem = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                if ctx.is_cancelled() {
                    return (item, Err(docindex_shared::DocIndexError::job("cancelled")));
                }
                let outcome = strategy.fetch(&item, &ctx).await;
                (item, outcome)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((item, Ok(FetchOutcome::Fetched(page)))) => {
                    if page.depth < opts.max_depth {
                        for link in strategy.discover_links(&page) {
                            queue.push(QueueItem {
                                url: link,
                                depth: page.depth + 1,
                                from_llms_txt: false,
                                known_etag: None,
                                known_last_modified: None,
                            });
                        }
                    }
                    result.fetched.push(page);
                    let _ = &item;
                }
                Ok((_, Ok(FetchOutcome::NotModified { url }))) => {
                    result.not_modified.push(url);
                }
                Ok((_, Ok(FetchOutcome::Removed { url }))) => {
                    result.removed.push(url);
                }
                Ok((item, Err(e))) => {
                    warn!(url = %item.url, error = %e, "fetch failed");
                    result.errors.push((item.url.to_string(), e.to_string()));
                    result.pages_skipped += 1;
                }
                Err(e) => {
                    result.errors.push(("unknown".into(), e.to_string()));
                    result.pages_skipped += 1;
                }
            }
        }
    }

    result.duration = start.elapsed();

    info!(
        pages_fetched = result.fetched.len(),
        not_modified = result.not_modified.len(),
        removed = result.removed.len(),
        pages_skipped = result.pages_skipped,
        errors = result.errors.len(),
        duration_ms = result.duration.as_millis(),
        cancelled = result.cancelled,
        "scrape finished"
    );

    Ok(result)
}

/// Only `Web`/`GitHosting` inputs have a meaningful URL scope; other
/// strategies enumerate their full frontier up front and never consult this.
fn scope_filter(ctx: &JobCtx) -> Option<UrlFilter> {
    let start_url = match &ctx.input {
        ScrapeInput::Web(url) | ScrapeInput::GitHosting(url) => url.clone(),
        _ => return None,
    };

    Some(UrlFilter::new(
        &start_url,
        ctx.options.scope,
        &ctx.options.include_patterns,
        &ctx.options.exclude_patterns,
    ))
}
