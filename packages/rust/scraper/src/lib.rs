//! Scraper strategies and the BFS executor that drives them (spec.md §4.3,
//! §4.4).
//!
//! `Strategy` replaces the teacher's single `Crawler` struct with a
//! first-match-wins registry (`StrategyRegistry`, mirroring
//! `AdapterRegistry::detect`'s loop shape) keyed on the *shape* of the
//! scrape input rather than on sniffed document content. A shared
//! [`executor`] then drives whichever strategy matched.

pub mod executor;
pub mod scope;
pub mod strategies;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use docindex_shared::{DocIndexError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

pub use scope::{ScopeKind, UrlFilter};
pub use executor::{ExecutionResult, ExecutorOptions};

/// Package ecosystem a [`ScrapeInput::PackageRegistry`] resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageEcosystem {
    Npm,
    PyPi,
}

/// The shape of a scrape request, decided by the caller (an external CLI/
/// API shell) before the strategy registry ever sees it — mirrors how the
/// teacher's adapters inspect an already-classified `Html` document, just
/// one level up: here the *input itself* carries its shape. `Serialize`/
/// `Deserialize` so a job can persist and later reconstruct exactly what it
/// was asked to scrape, alongside its `ScraperOptions` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeInput {
    /// A normal website/documentation URL.
    Web(Url),
    /// A local directory or file to walk and index.
    LocalPath(PathBuf),
    /// A named package in an ecosystem registry, optionally pinned to a
    /// version; resolved to a canonical docs URL and handed to `Web`.
    PackageRegistry {
        ecosystem: PackageEcosystem,
        name: String,
        version: Option<String>,
    },
    /// A git hosting URL (repo root, wiki, or blob path).
    GitHosting(Url),
}

impl ScrapeInput {
    pub fn display(&self) -> String {
        match self {
            ScrapeInput::Web(url) | ScrapeInput::GitHosting(url) => url.to_string(),
            ScrapeInput::LocalPath(path) => path.display().to_string(),
            ScrapeInput::PackageRegistry { name, version, .. } => match version {
                Some(v) => format!("{name}@{v}"),
                None => name.clone(),
            },
        }
    }
}

/// A single item of crawl frontier: a URL still to fetch, at a known depth.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub url: Url,
    pub depth: u32,
    /// Seeded from an llms.txt entry rather than discovered by following a
    /// link — content pipelines may treat these with higher trust.
    pub from_llms_txt: bool,
    /// Refresh mode only: validators already on file for this URL, used for
    /// a conditional fetch.
    pub known_etag: Option<String>,
    pub known_last_modified: Option<String>,
}

impl QueueItem {
    pub fn seed(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            from_llms_txt: false,
            known_etag: None,
            known_last_modified: None,
        }
    }

    pub fn from_llms_txt(url: Url, depth: u32) -> Self {
        Self {
            url,
            depth,
            from_llms_txt: true,
            known_etag: None,
            known_last_modified: None,
        }
    }
}

/// A previously-indexed page, supplied by the caller in refresh mode so the
/// executor can seed conditional-fetch validators without depending on
/// `docindex-store` directly (kept out of this crate's dependency graph).
#[derive(Debug, Clone)]
pub struct KnownPage {
    pub url: Url,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Whether a job is an initial scrape or a refresh of previously-indexed
/// pages (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum JobMode {
    Scrape,
    Refresh { known: Vec<KnownPage> },
}

/// The outcome of fetching one queue item.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Freshly fetched (or unconditionally fetched) content.
    Fetched(FetchedPage),
    /// Conditional fetch returned 304; only the store's timestamp should be
    /// touched.
    NotModified { url: Url },
    /// The resource is gone (404); the caller should delete it from the
    /// store.
    Removed { url: Url },
}

/// A successfully fetched page, ready for the content pipeline.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub depth: u32,
    pub from_llms_txt: bool,
    pub content_type: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// How aggressively the `Web` strategy should render dynamic content before
/// handing HTML to the content pipeline (whose own `DynamicRenderStage` is a
/// no-op placeholder — actual rendering happens here; see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Always plain HTTP.
    Never,
    /// Plain HTTP first; fall back to the browser fetcher if the response
    /// looks like an unrendered SPA shell.
    Auto,
    /// Always render via the browser fetcher.
    Playwright,
}

/// Options shared by every strategy for one job run (a subset of
/// `docindex_shared::config::ScraperSection` plus the resolved scope).
/// `Serialize`/`Deserialize` so a job's options can round-trip through
/// `docindex-scheduler`'s `options_snapshot` column verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperOptions {
    pub max_pages: u64,
    pub max_depth: u32,
    pub concurrency: u32,
    pub scope: ScopeKind,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub ignore_errors: bool,
    pub render_mode: RenderMode,
    pub render_url: String,
}

impl Default for ScraperOptions {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            max_depth: 5,
            concurrency: 4,
            scope: ScopeKind::Subpages,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            ignore_errors: false,
            render_mode: RenderMode::Auto,
            render_url: "http://localhost:9223".into(),
        }
    }
}

/// Everything a strategy needs for one job run.
pub struct JobCtx {
    pub input: ScrapeInput,
    pub options: ScraperOptions,
    pub mode: JobMode,
    pub cancellation: CancellationToken,
    /// `GitHosting` resolves a repo's default branch at most once per job.
    pub git_default_branch: tokio::sync::OnceCell<String>,
}

impl JobCtx {
    pub fn new(input: ScrapeInput, options: ScraperOptions, mode: JobMode) -> Self {
        Self {
            input,
            options,
            mode,
            cancellation: CancellationToken::new(),
            git_default_branch: tokio::sync::OnceCell::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn known_page(&self, url: &Url) -> Option<&KnownPage> {
        match &self.mode {
            JobMode::Refresh { known } => known.iter().find(|p| &p.url == url),
            JobMode::Scrape => None,
        }
    }
}

/// A pluggable way of turning one [`ScrapeInput`] into a crawl frontier and
/// knowing how to fetch/expand items from it (spec.md §4.3).
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy handles the given input shape.
    fn matches(&self, input: &ScrapeInput) -> bool;

    /// Produce the initial queue from the job's input (e.g. the teacher's
    /// `Crawler::crawl`'s single-item start queue, generalized to llms.txt
    /// seeding for `Web` and a full recursive walk for `LocalFile`).
    async fn seed(&self, ctx: &JobCtx) -> Result<Vec<QueueItem>>;

    /// Fetch one queue item.
    async fn fetch(&self, item: &QueueItem, ctx: &JobCtx) -> Result<FetchOutcome>;

    /// Links discovered on an already-fetched page. Strategies whose `seed`
    /// already enumerates the complete frontier (`LocalFile`, `GitHosting`)
    /// leave this at the default no-op.
    fn discover_links(&self, _page: &FetchedPage) -> Vec<Url> {
        Vec::new()
    }
}

/// First-match-wins strategy lookup, mirroring
/// `contextbuilder_crawler::adapters::AdapterRegistry::detect`'s loop shape.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Registers strategies in the canonical order: Web, LocalFile,
    /// PackageRegistry, GitHosting.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Arc::new(strategies::web::WebStrategy::new()),
                Arc::new(strategies::local_file::LocalFileStrategy::new()),
                Arc::new(strategies::package_registry::PackageRegistryStrategy::new()),
                Arc::new(strategies::git_hosting::GitHostingStrategy::new()),
            ],
        }
    }

    #[instrument(skip_all)]
    pub fn resolve(&self, input: &ScrapeInput) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .iter()
            .find(|s| s.matches(input))
            .cloned()
            .ok_or_else(|| DocIndexError::validation(format!("no strategy matches input: {}", input.display())))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
