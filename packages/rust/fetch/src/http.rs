//! HTTP fetcher: `reqwest`-backed, with exponential backoff over retryable
//! statuses and transport errors (spec.md §4.1). Client construction and the
//! SSRF guard are a direct generalization of
//! `contextbuilder_crawler::engine::Crawler::new`/`is_ssrf_target`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::is_retryable_status;
use crate::ssrf::is_ssrf_target;
use crate::{Fetched, FetchError, FetchOpts, Fetcher, Probed, USER_AGENT};

/// HTTP fetcher configuration (maps 1:1 onto `docindex_shared::config::
/// FetcherSection`; kept crate-local to avoid a dependency cycle).
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub request_timeout: Duration,
    pub allow_private_hosts: bool,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            request_timeout: Duration::from_secs(30),
            allow_private_hosts: false,
        }
    }
}

pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Permanent {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client, config })
    }

    /// For tests driving a local `wiremock` server, which is necessarily on
    /// loopback.
    pub fn allow_private_hosts(mut self) -> Self {
        self.config.allow_private_hosts = true;
        self
    }

    fn check_ssrf(&self, url: &Url) -> Result<(), FetchError> {
        if !self.config.allow_private_hosts && is_ssrf_target(url) {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                message: "blocked by SSRF guard".into(),
            });
        }
        Ok(())
    }

    fn build_request(
        &self,
        url: &Url,
        opts: &FetchOpts,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(url.as_str())
            .header("Accept", "text/markdown, text/html;q=0.9, */*;q=0.8");

        if let Some(etag) = &opts.if_none_match {
            req = req.header("If-None-Match", etag);
        }
        if let Some(ts) = &opts.if_modified_since {
            req = req.header("If-Modified-Since", ts);
        }
        for (k, v) in &opts.extra_headers {
            req = req.header(k, v);
        }
        req
    }

    #[instrument(skip(self, opts), fields(%url))]
    async fn fetch_with_retry(&self, url: &Url, opts: &FetchOpts) -> Result<Fetched, FetchError> {
        self.check_ssrf(url)?;

        let mut attempt = 0u32;
        loop {
            if opts.is_cancelled() {
                return Err(FetchError::Transient {
                    url: url.to_string(),
                    message: "cancelled".into(),
                });
            }

            let result = self.build_request(url, opts).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 304 {
                        return Err(FetchError::NotModified {
                            url: url.to_string(),
                        });
                    }
                    if status.as_u16() == 404 {
                        return Err(FetchError::NotFound {
                            url: url.to_string(),
                        });
                    }
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(FetchError::Unauthorized {
                            url: url.to_string(),
                        });
                    }
                    if is_retryable_status(status.as_u16()) && attempt < self.config.max_retries {
                        attempt += 1;
                        let delay = self.config.base_delay_ms * 2u64.pow(attempt - 1);
                        warn!(%url, status = %status, attempt, delay_ms = delay, "retrying");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(FetchError::Permanent {
                            url: url.to_string(),
                            message: format!("HTTP {status}"),
                        });
                    }

                    let content_type = response
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let etag = response
                        .headers()
                        .get("etag")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    let last_modified = response
                        .headers()
                        .get("last-modified")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);

                    let body = response.bytes().await.map_err(|e| FetchError::Transient {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;

                    debug!(%url, bytes = body.len(), "fetched");

                    return Ok(Fetched {
                        url: url.clone(),
                        status: status.as_u16(),
                        content_type,
                        body: body.to_vec(),
                        etag,
                        last_modified,
                        discovered_links: Vec::new(),
                    });
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.base_delay_ms * 2u64.pow(attempt - 1);
                    warn!(%url, error = %e, attempt, delay_ms = delay, "retrying after transport error");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    return Err(FetchError::Transient {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, opts: &FetchOpts) -> Result<Fetched, FetchError> {
        self.fetch_with_retry(url, opts).await
    }

    async fn probe(&self, url: &Url, opts: &FetchOpts) -> Result<Probed, FetchError> {
        self.check_ssrf(url)?;

        let response = self
            .build_request(url, opts)
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if response.status().as_u16() == 304 {
            return Ok(Probed::NotModified);
        }
        if response.status().as_u16() == 404 {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Ok(Probed::Modified {
            etag,
            last_modified,
        })
    }
}
