//! The fetcher set (spec.md §4.1): a uniform `Fetcher` trait with HTTP,
//! browser, local-file, and archive implementations.
//!
//! Grounded on `contextbuilder_crawler::engine`'s client construction, SSRF
//! guard, and link extraction (see [`ssrf`], [`http::HttpFetcher`]); the
//! browser fetcher is modeled as an external headless-render HTTP service
//! client rather than an embedded browser-automation crate (see DESIGN.md).

pub mod archive;
pub mod browser;
pub mod cache;
pub mod error;
pub mod file;
pub mod http;
pub mod ssrf;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use error::FetchError;

/// User-Agent advertised by every network fetcher.
pub const USER_AGENT: &str = concat!("docindex/", env!("CARGO_PKG_VERSION"));

/// Options threaded through every `fetch`/`probe` call (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct FetchOpts {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub extra_headers: HashMap<String, String>,
    pub signal: Option<CancellationToken>,
    pub timeout: Option<Duration>,
}

impl FetchOpts {
    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// The body of a successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Links discovered inline by a fetcher that already parsed the body
    /// (e.g. the browser fetcher merging iframe/shadow-DOM content); most
    /// fetchers leave this empty and rely on the content pipeline's own
    /// link-discovery stage instead.
    pub discovered_links: Vec<Url>,
}

impl Fetched {
    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }
}

/// The result of a HEAD/conditional-GET probe.
#[derive(Debug, Clone)]
pub enum Probed {
    /// 304 Not Modified (or local-file mtime/hash unchanged).
    NotModified,
    /// Changed (or unconditionally present); carries fresh validators.
    Modified {
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// Uniform interface implemented by every fetcher variant (spec.md §4.1).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, opts: &FetchOpts) -> Result<Fetched, FetchError>;

    async fn probe(&self, url: &Url, opts: &FetchOpts) -> Result<Probed, FetchError>;
}
