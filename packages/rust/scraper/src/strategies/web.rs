//! The default strategy: a normal website crawl (spec.md §4.3), generalized
//! from `contextbuilder_crawler::engine::Crawler`'s link-enqueue loop into a
//! `seed`/`fetch`/`discover_links` split driven by the shared executor.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use docindex_discovery::{self as discovery, DiscoveryOptions, DiscoveryResult};
use docindex_fetch::http::{HttpFetcher, HttpFetcherConfig};
use docindex_fetch::{FetchOpts, Fetched, Fetcher, Probed};
use docindex_shared::{DocIndexError, Result};

use crate::{FetchOutcome, FetchedPage, JobCtx, JobMode, QueueItem, RenderMode, ScrapeInput, Strategy};

pub struct WebStrategy {
    fetcher: HttpFetcher,
}

impl WebStrategy {
    pub fn new() -> Self {
        Self {
            fetcher: HttpFetcher::new(HttpFetcherConfig::default()).expect("default HTTP client builds"),
        }
    }

    fn start_url(ctx: &JobCtx) -> Result<Url> {
        match &ctx.input {
            ScrapeInput::Web(url) => Ok(url.clone()),
            other => Err(DocIndexError::validation(format!(
                "WebStrategy cannot handle input: {}",
                other.display()
            ))),
        }
    }

    async fn seed_from_llms_txt(start_url: &Url) -> Option<Vec<QueueItem>> {
        let result = discovery::discover(start_url, &DiscoveryOptions::default()).await.ok()?;
        match result {
            DiscoveryResult::Found { base, parsed, .. } => {
                let mut items = Vec::with_capacity(parsed.entries.len());
                for entry in &parsed.entries {
                    let url = Url::parse(&entry.url)
                        .or_else(|_| Url::parse(&base).and_then(|b| b.join(&entry.url)))
                        .ok()?;
                    items.push(QueueItem::from_llms_txt(url, 0));
                }
                if items.is_empty() {
                    None
                } else {
                    info!(count = items.len(), %base, "seeded queue from llms.txt");
                    Some(items)
                }
            }
            DiscoveryResult::NotFound => None,
        }
    }

    /// For an llms.txt-seeded URL, a sibling `.md` file often carries the
    /// same content pre-rendered to Markdown (cheaper to fetch and parse
    /// than the HTML page). Tried first; falls back to `url` itself.
    async fn fetch_preferring_md_sibling(&self, url: &Url, opts: &FetchOpts) -> std::result::Result<Fetched, docindex_fetch::FetchError> {
        if url.path().ends_with(".md") {
            return self.fetcher.fetch(url, opts).await;
        }

        let mut md_url = url.clone();
        md_url.set_path(&format!("{}.md", url.path()));

        match self.fetcher.fetch(&md_url, opts).await {
            Ok(fetched) => Ok(fetched),
            Err(_) => self.fetcher.fetch(url, opts).await,
        }
    }

    async fn fetch_rendered(&self, url: &Url, ctx: &JobCtx, opts: &FetchOpts) -> std::result::Result<Fetched, docindex_fetch::FetchError> {
        match ctx.options.render_mode {
            RenderMode::Never => self.fetcher.fetch(url, opts).await,
            RenderMode::Playwright => self.browser_fetch(url, ctx, opts).await,
            RenderMode::Auto => {
                let fetched = self.fetcher.fetch(url, opts).await?;
                if looks_like_unrendered_spa(&fetched) {
                    debug!(%url, "response looks like an unrendered SPA shell, retrying via browser");
                    self.browser_fetch(url, ctx, opts).await
                } else {
                    Ok(fetched)
                }
            }
        }
    }

    async fn browser_fetch(&self, url: &Url, ctx: &JobCtx, opts: &FetchOpts) -> std::result::Result<Fetched, docindex_fetch::FetchError> {
        use docindex_fetch::browser::{BrowserFetcher, BrowserFetcherConfig};

        let browser = BrowserFetcher::new(BrowserFetcherConfig {
            render_url: ctx.options.render_url.clone(),
            ..Default::default()
        })?;
        browser.fetch(url, opts).await
    }
}

impl Default for WebStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic for "this HTML is a client-rendered shell with no real
/// content yet": a short visible-text body relative to its markup size.
fn looks_like_unrendered_spa(fetched: &Fetched) -> bool {
    if !fetched.content_type.contains("html") {
        return false;
    }
    let Ok(text) = fetched.text() else { return false };
    let doc = Html::parse_document(&text);
    let body_sel = Selector::parse("body").unwrap();
    let visible_len: usize = doc
        .select(&body_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().len())
        .unwrap_or(0);
    visible_len < 200 && text.len() > 2000
}

#[async_trait]
impl Strategy for WebStrategy {
    fn name(&self) -> &'static str {
        "web"
    }

    fn matches(&self, input: &ScrapeInput) -> bool {
        matches!(input, ScrapeInput::Web(_))
    }

    async fn seed(&self, ctx: &JobCtx) -> Result<Vec<QueueItem>> {
        let start_url = Self::start_url(ctx)?;

        if let JobMode::Refresh { known } = &ctx.mode {
            return Ok(known
                .iter()
                .map(|page| QueueItem {
                    url: page.url.clone(),
                    depth: 0,
                    from_llms_txt: false,
                    known_etag: page.etag.clone(),
                    known_last_modified: page.last_modified.clone(),
                })
                .collect());
        }

        if let Some(items) = Self::seed_from_llms_txt(&start_url).await {
            return Ok(items);
        }

        Ok(vec![QueueItem::seed(start_url)])
    }

    async fn fetch(&self, item: &QueueItem, ctx: &JobCtx) -> Result<FetchOutcome> {
        let opts = FetchOpts {
            if_none_match: item.known_etag.clone(),
            if_modified_since: item.known_last_modified.clone(),
            signal: Some(ctx.cancellation.clone()),
            ..Default::default()
        };

        if item.known_etag.is_some() || item.known_last_modified.is_some() {
            match self.fetcher.probe(&item.url, &opts).await {
                Ok(Probed::NotModified) => return Ok(FetchOutcome::NotModified { url: item.url.clone() }),
                Ok(Probed::Modified { .. }) => {}
                Err(docindex_fetch::FetchError::NotFound { .. }) => {
                    return Ok(FetchOutcome::Removed { url: item.url.clone() })
                }
                Err(e) => return Err(e.into()),
            }
        }

        let fetched = if item.from_llms_txt {
            self.fetch_preferring_md_sibling(&item.url, &opts).await
        } else {
            self.fetch_rendered(&item.url, ctx, &opts).await
        };

        match fetched {
            Ok(fetched) => Ok(FetchOutcome::Fetched(FetchedPage {
                url: fetched.url,
                depth: item.depth,
                from_llms_txt: item.from_llms_txt,
                content_type: fetched.content_type,
                body: fetched.body,
                etag: fetched.etag,
                last_modified: fetched.last_modified,
            })),
            Err(docindex_fetch::FetchError::NotModified { .. }) => {
                Ok(FetchOutcome::NotModified { url: item.url.clone() })
            }
            Err(docindex_fetch::FetchError::NotFound { .. }) => Ok(FetchOutcome::Removed { url: item.url.clone() }),
            Err(e) => Err(e.into()),
        }
    }

    fn discover_links(&self, page: &FetchedPage) -> Vec<Url> {
        if !page.content_type.contains("html") {
            return Vec::new();
        }
        let Ok(text) = String::from_utf8(page.body.clone()) else {
            return Vec::new();
        };
        let doc = Html::parse_document(&text);
        let link_sel = Selector::parse("a[href]").unwrap();
        let mut links = Vec::new();

        for el in doc.select(&link_sel) {
            if let Some(href) = el.value().attr("href") {
                if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
                    continue;
                }
                if let Ok(mut resolved) = page.url.join(href) {
                    resolved.set_fragment(None);
                    links.push(resolved);
                }
            }
        }

        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScraperOptions;

    #[test]
    fn matches_only_web_input() {
        let strategy = WebStrategy::new();
        assert!(strategy.matches(&ScrapeInput::Web(Url::parse("https://example.com").unwrap())));
        assert!(!strategy.matches(&ScrapeInput::LocalPath("/tmp".into())));
    }

    #[test]
    fn discover_links_skips_anchors_and_javascript() {
        let strategy = WebStrategy::new();
        let html = r##"<html><body><a href="/page2">Page 2</a><a href="#section">Anchor</a><a href="javascript:void(0)">JS</a></body></html>"##;
        let page = FetchedPage {
            url: Url::parse("https://docs.example.com/page1").unwrap(),
            depth: 0,
            from_llms_txt: false,
            content_type: "text/html".into(),
            body: html.as_bytes().to_vec(),
            etag: None,
            last_modified: None,
        };
        let links = strategy.discover_links(&page);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://docs.example.com/page2");
    }

    #[tokio::test]
    async fn seed_refresh_mode_carries_known_validators() {
        let strategy = WebStrategy::new();
        let ctx = JobCtx::new(
            ScrapeInput::Web(Url::parse("https://docs.example.com").unwrap()),
            ScraperOptions::default(),
            JobMode::Refresh {
                known: vec![crate::KnownPage {
                    url: Url::parse("https://docs.example.com/page").unwrap(),
                    etag: Some("abc123".into()),
                    last_modified: None,
                }],
            },
        );

        let items = strategy.seed(&ctx).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].known_etag.as_deref(), Some("abc123"));
    }
}
