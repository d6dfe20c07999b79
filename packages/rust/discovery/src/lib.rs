//! llms.txt / llms-full.txt discovery and detection logic.
//!
//! Before scraping a site, docindex first checks whether the site publishes
//! an `llms.txt` file (per <https://llmstxt.org/>). If found, it parses the
//! file to extract page URLs instead of crawling, which is faster and more
//! respectful of the target site.
//!
//! Probing order (spec.md §4.3): the parent directory of the input URL's
//! path is tried first (its last path segment stripped, not recomputed from
//! any crawl scope), then the site root. The first candidate that yields a
//! valid llms.txt wins; the other is never probed.

mod parser;

use docindex_shared::{DocIndexError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

pub use parser::{LlmsEntry, LlmsParsed, LlmsSection};

/// Maximum number of redirects to follow when fetching llms.txt.
const MAX_REDIRECTS: usize = 3;

/// Default timeout in seconds for fetching llms.txt.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum response size we consider valid (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("docindex/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// DiscoveryResult
// ---------------------------------------------------------------------------

/// Outcome of the llms.txt discovery process.
#[derive(Debug, Clone)]
pub enum DiscoveryResult {
    /// An llms.txt (and optionally llms-full.txt) was found.
    Found {
        /// The candidate base URL (directory) this was found at.
        base: String,
        /// The parsed llms.txt content.
        parsed: LlmsParsed,
        /// Raw content of llms.txt.
        llms_txt: String,
        /// Raw content of llms-full.txt, if also present.
        llms_full_txt: Option<String>,
    },
    /// No valid llms.txt was found at either candidate; caller should fall
    /// back to crawling.
    NotFound,
}

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for the discovery process.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Discover llms.txt / llms-full.txt for the given input URL.
///
/// Tries the parent directory of `url`'s path first, then the site's origin.
/// At each candidate, `llms.txt` and `llms-full.txt` are checked in parallel;
/// the first candidate with a valid `llms.txt` short-circuits the search.
#[instrument(skip_all, fields(url = %url))]
pub async fn discover(url: &Url, opts: &DiscoveryOptions) -> Result<DiscoveryResult> {
    let client = build_client(opts)?;
    let origin = origin_url(url)?;

    let mut candidates = Vec::with_capacity(2);
    if let Some(parent) = parent_dir_url(url, &origin) {
        if parent != origin {
            candidates.push(parent);
        }
    }
    candidates.push(origin);

    for base in candidates {
        info!(%base, "probing for llms.txt");
        if let Some(result) = probe_candidate(&client, &base).await? {
            return Ok(result);
        }
    }

    Ok(DiscoveryResult::NotFound)
}

/// Probe a single candidate base (directory or origin) for llms.txt.
async fn probe_candidate(client: &Client, base: &str) -> Result<Option<DiscoveryResult>> {
    let llms_url = format!("{base}/llms.txt");
    let llms_full_url = format!("{base}/llms-full.txt");

    let (llms_result, llms_full_result) = tokio::join!(
        fetch_and_validate(client, &llms_url),
        fetch_and_validate(client, &llms_full_url),
    );

    let llms_txt = match llms_result {
        Ok(content) => content,
        Err(e) => {
            debug!(error = %e, %base, "llms.txt not found or invalid at this candidate");
            return Ok(None);
        }
    };

    let llms_full_txt = match llms_full_result {
        Ok(content) => {
            info!(%base, "llms-full.txt also found");
            Some(content)
        }
        Err(e) => {
            debug!(error = %e, %base, "llms-full.txt not found (optional)");
            None
        }
    };

    let parsed = parser::parse_llms_txt(&llms_txt)?;

    info!(
        %base,
        title = %parsed.title,
        sections = parsed.sections.len(),
        entries = parsed.entries.len(),
        "llms.txt discovered and parsed"
    );

    Ok(Some(DiscoveryResult::Found {
        base: base.to_string(),
        parsed,
        llms_txt,
        llms_full_txt,
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| DocIndexError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

/// Strip the last path segment off `url`, yielding the parent directory's
/// base URL (origin + path, no trailing slash). Returns `None` when the
/// path has no segment to strip (root path), in which case the origin
/// candidate already covers it.
fn parent_dir_url(url: &Url, origin: &str) -> Option<String> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if segments.is_empty() {
        return None;
    }

    let parent_segments = &segments[..segments.len() - 1];
    if parent_segments.is_empty() {
        return None;
    }

    Some(format!("{origin}/{}", parent_segments.join("/")))
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| DocIndexError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch a URL and validate the response is valid Markdown content.
async fn fetch_and_validate(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DocIndexError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DocIndexError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(DocIndexError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    let body = response
        .text()
        .await
        .map_err(|e| DocIndexError::Network(format!("{url}: failed to read body: {e}")))?;

    let trimmed = body.trim_start();
    if !trimmed.starts_with("# ") {
        return Err(DocIndexError::validation(format!(
            "{url}: content does not start with an H1 heading"
        )));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_LLMS_TXT: &str = "# Example Docs\n\n> Example documentation for testing.\n\n## Getting Started\n\n- [Installation](https://docs.example.com/install)\n";

    #[test]
    fn test_origin_url_simple() {
        let url = Url::parse("https://docs.example.com/foo/bar").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "https://docs.example.com");
    }

    #[test]
    fn test_origin_url_with_port() {
        let url = Url::parse("http://localhost:3000/docs").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "http://localhost:3000");
    }

    #[test]
    fn test_parent_dir_url_strips_last_segment() {
        let url = Url::parse("https://docs.example.com/docs/guide").unwrap();
        let origin = origin_url(&url).unwrap();
        assert_eq!(
            parent_dir_url(&url, &origin).as_deref(),
            Some("https://docs.example.com/docs")
        );
    }

    #[test]
    fn test_parent_dir_url_none_at_root() {
        let url = Url::parse("https://docs.example.com/").unwrap();
        let origin = origin_url(&url).unwrap();
        assert_eq!(parent_dir_url(&url, &origin), None);
    }

    #[test]
    fn test_parent_dir_url_none_for_single_segment() {
        let url = Url::parse("https://docs.example.com/guide").unwrap();
        let origin = origin_url(&url).unwrap();
        assert_eq!(parent_dir_url(&url, &origin), None);
    }

    #[tokio::test]
    async fn test_discover_at_site_root() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(VALID_LLMS_TXT))
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms-full.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let opts = DiscoveryOptions::default();
        let result = discover(&url, &opts).await.unwrap();

        match result {
            DiscoveryResult::Found {
                parsed,
                llms_full_txt,
                ..
            } => {
                assert_eq!(parsed.title, "Example Docs");
                assert!(!parsed.sections.is_empty());
                assert!(llms_full_txt.is_none());
            }
            DiscoveryResult::NotFound => panic!("expected Found, got NotFound"),
        }
    }

    /// spec.md §8 scenario 5: a parent-directory llms.txt is probed first
    /// and wins; the site-root llms.txt (also present but different) must
    /// never be consulted once the parent-dir probe succeeds.
    #[tokio::test]
    async fn test_discover_prefers_parent_directory_over_site_root() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/docs/llms.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(VALID_LLMS_TXT))
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/docs/llms-full.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        // Root llms.txt present too, with a distinguishable title — must
        // not be the one returned.
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms.txt"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("# Site Root Docs\n\n- [Root](https://example.com/root)\n"),
            )
            .mount(&server)
            .await;

        let base = server.uri();
        let url = Url::parse(&format!("{base}/docs/guide")).unwrap();
        let opts = DiscoveryOptions::default();
        let result = discover(&url, &opts).await.unwrap();

        match result {
            DiscoveryResult::Found { base: found_base, parsed, .. } => {
                assert_eq!(found_base, format!("{base}/docs"));
                assert_eq!(parsed.title, "Example Docs");
            }
            DiscoveryResult::NotFound => panic!("expected Found at parent directory"),
        }
    }

    /// When the parent directory has no llms.txt, falls back to site root.
    #[tokio::test]
    async fn test_discover_falls_back_to_site_root() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/docs/llms.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/docs/llms-full.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(VALID_LLMS_TXT))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms-full.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base = server.uri();
        let url = Url::parse(&format!("{base}/docs/guide")).unwrap();
        let opts = DiscoveryOptions::default();
        let result = discover(&url, &opts).await.unwrap();

        match result {
            DiscoveryResult::Found { base: found_base, .. } => {
                assert_eq!(found_base, base);
            }
            DiscoveryResult::NotFound => panic!("expected Found at site root"),
        }
    }

    #[tokio::test]
    async fn test_discover_with_full_txt() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(VALID_LLMS_TXT))
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms-full.txt"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string(VALID_LLMS_TXT),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let opts = DiscoveryOptions::default();
        let result = discover(&url, &opts).await.unwrap();

        match result {
            DiscoveryResult::Found { llms_full_txt, .. } => {
                assert!(llms_full_txt.is_some());
            }
            DiscoveryResult::NotFound => panic!("expected Found"),
        }
    }

    #[tokio::test]
    async fn test_discover_not_found_anywhere() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms-full.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let opts = DiscoveryOptions::default();
        let result = discover(&url, &opts).await.unwrap();

        assert!(matches!(result, DiscoveryResult::NotFound));
    }

    #[tokio::test]
    async fn test_discover_invalid_content_is_not_found() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms.txt"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("This is not valid llms.txt\nNo H1 heading"),
            )
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/llms-full.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let opts = DiscoveryOptions::default();
        let result = discover(&url, &opts).await.unwrap();

        assert!(matches!(result, DiscoveryResult::NotFound));
    }
}
