//! Fetcher-specific error taxonomy (spec.md §4.1, §9 redesign flag: "embedding
//! client failure surface → sum type ... retry branches on kind not substring
//! matching" — the same philosophy applies to fetch failures).

use docindex_shared::DocIndexError;

/// Why a fetch failed, and whether retrying makes sense.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport error, timeout, or a retryable HTTP status (408/425/429/5xx).
    /// The caller has already exhausted retries when this is returned.
    #[error("transient fetch failure for {url}: {message}")]
    Transient { url: String, message: String },

    /// A non-retryable HTTP status (4xx other than 408/429) or malformed URL.
    #[error("permanent fetch failure for {url}: {message}")]
    Permanent { url: String, message: String },

    /// HTTP 404, or the local/archive-relative equivalent ("not found").
    #[error("not found: {url}")]
    NotFound { url: String },

    /// HTTP 304 returned from a conditional `fetch()` (not just `probe()`):
    /// the caller sent `If-None-Match`/`If-Modified-Since` and the resource
    /// is unchanged. Distinct from `NotFound` — spec.md §4.1 requires a
    /// not-modified response to only refresh timestamps, never delete the
    /// page.
    #[error("not modified: {url}")]
    NotModified { url: String },

    /// HTTP 401/403.
    #[error("unauthorized: {url}")]
    Unauthorized { url: String },

    /// Response exceeded `scraper.document.maxSize`.
    #[error("document too large: {url} ({size} bytes > max {max})")]
    TooLarge { url: String, size: u64, max: u64 },
}

impl FetchError {
    /// Whether this kind of failure is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Transient { url, .. }
            | FetchError::Permanent { url, .. }
            | FetchError::NotFound { url }
            | FetchError::NotModified { url }
            | FetchError::Unauthorized { url }
            | FetchError::TooLarge { url, .. } => url,
        }
    }
}

impl From<FetchError> for DocIndexError {
    fn from(err: FetchError) -> Self {
        DocIndexError::Fetch(err.to_string())
    }
}

/// Classify an HTTP status code per spec.md §4.1's retryable set.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
}
