//! Package registry strategy (spec.md §4.3): resolves an npm or PyPI package
//! name (optionally pinned to a version) to its canonical documentation
//! entry URL, then delegates the actual crawl to [`crate::strategies::web::
//! WebStrategy`].

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use docindex_fetch::USER_AGENT;
use docindex_shared::{DocIndexError, Result};

use crate::strategies::web::WebStrategy;
use crate::{FetchOutcome, FetchedPage, JobCtx, PackageEcosystem, QueueItem, ScrapeInput, Strategy};

pub struct PackageRegistryStrategy {
    client: Client,
    web: WebStrategy,
}

impl PackageRegistryStrategy {
    pub fn new() -> Self {
        Self {
            client: Client::builder().user_agent(USER_AGENT).build().expect("default client builds"),
            web: WebStrategy::new(),
        }
    }

    async fn resolve_doc_url(&self, ecosystem: PackageEcosystem, name: &str, version: Option<&str>) -> Result<Url> {
        match ecosystem {
            PackageEcosystem::Npm => self.resolve_npm(name, version).await,
            PackageEcosystem::PyPi => self.resolve_pypi(name, version).await,
        }
    }

    async fn resolve_npm(&self, name: &str, version: Option<&str>) -> Result<Url> {
        let api_url = format!("https://registry.npmjs.org/{name}");
        let body: Value = self
            .client
            .get(&api_url)
            .send()
            .await
            .map_err(|e| DocIndexError::Network(format!("{api_url}: {e}")))?
            .json()
            .await
            .map_err(|e| DocIndexError::Network(format!("{api_url}: invalid JSON: {e}")))?;

        let version_key = version.map(str::to_string).or_else(|| {
            body.get("dist-tags")
                .and_then(|t| t.get("latest"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

        let version_obj = version_key
            .as_deref()
            .and_then(|v| body.get("versions").and_then(|versions| versions.get(v)));

        let homepage = version_obj
            .and_then(|v| v.get("homepage"))
            .and_then(|v| v.as_str())
            .or_else(|| body.get("homepage").and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://www.npmjs.com/package/{name}"));

        Url::parse(&homepage).map_err(|e| DocIndexError::validation(format!("invalid homepage URL {homepage}: {e}")))
    }

    async fn resolve_pypi(&self, name: &str, version: Option<&str>) -> Result<Url> {
        let api_url = match version {
            Some(v) => format!("https://pypi.org/pypi/{name}/{v}/json"),
            None => format!("https://pypi.org/pypi/{name}/json"),
        };

        let body: Value = self
            .client
            .get(&api_url)
            .send()
            .await
            .map_err(|e| DocIndexError::Network(format!("{api_url}: {e}")))?
            .json()
            .await
            .map_err(|e| DocIndexError::Network(format!("{api_url}: invalid JSON: {e}")))?;

        let info = body.get("info").ok_or_else(|| DocIndexError::parse(format!("{api_url}: missing 'info'")))?;

        let project_urls = info.get("project_urls");
        let doc_url = project_urls
            .and_then(|urls| urls.get("Documentation"))
            .and_then(|v| v.as_str())
            .or_else(|| info.get("home_page").and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://pypi.org/project/{name}/"));

        Url::parse(&doc_url).map_err(|e| DocIndexError::validation(format!("invalid documentation URL {doc_url}: {e}")))
    }
}

impl Default for PackageRegistryStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for PackageRegistryStrategy {
    fn name(&self) -> &'static str {
        "package_registry"
    }

    fn matches(&self, input: &ScrapeInput) -> bool {
        matches!(input, ScrapeInput::PackageRegistry { .. })
    }

    async fn seed(&self, ctx: &JobCtx) -> Result<Vec<QueueItem>> {
        let ScrapeInput::PackageRegistry { ecosystem, name, version } = &ctx.input else {
            return Err(DocIndexError::validation("PackageRegistryStrategy requires a PackageRegistry input"));
        };

        let doc_url = self.resolve_doc_url(*ecosystem, name, version.as_deref()).await?;
        Ok(vec![QueueItem::seed(doc_url)])
    }

    async fn fetch(&self, item: &QueueItem, ctx: &JobCtx) -> Result<FetchOutcome> {
        self.web.fetch(item, ctx).await
    }

    fn discover_links(&self, page: &FetchedPage) -> Vec<Url> {
        self.web.discover_links(page)
    }
}
