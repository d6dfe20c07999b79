//! Git hosting strategy (spec.md §4.3): enumerates a GitHub repository via
//! the contents API, or follows wiki/blob URLs directly. Raw file content and
//! wiki pages are both fetched over plain HTTP, so fetching delegates to
//! [`crate::strategies::web::WebStrategy`] once the frontier is built.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use url::Url;

use docindex_fetch::file::mime_by_extension;
use docindex_fetch::USER_AGENT;
use docindex_shared::{DocIndexError, Result};

use crate::strategies::web::WebStrategy;
use crate::{FetchOutcome, FetchedPage, JobCtx, QueueItem, ScrapeInput, Strategy};

#[derive(Debug, Clone)]
enum GitTarget {
    /// The repository root: walk and enumerate every file via the contents
    /// API.
    Repo { owner: String, repo: String },
    /// A single blob at a known (or to-be-resolved) branch and path.
    Blob {
        owner: String,
        repo: String,
        branch: Option<String>,
        path: String,
    },
    /// The repo's wiki, a separate page tree reachable only over HTML.
    Wiki { owner: String, repo: String },
}

#[derive(Deserialize)]
struct ContentsEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
}

pub struct GitHostingStrategy {
    client: Client,
    web: WebStrategy,
    token: OnceLock<Option<String>>,
}

impl GitHostingStrategy {
    pub fn new() -> Self {
        Self {
            client: Client::builder().user_agent(USER_AGENT).build().expect("default client builds"),
            web: WebStrategy::new(),
            token: OnceLock::new(),
        }
    }

    /// Cached once per process: re-reading the environment on every request
    /// would be wasteful and the token cannot change mid-run anyway.
    fn auth_token(&self) -> Option<&str> {
        self.token
            .get_or_init(|| std::env::var("GITHUB_TOKEN").ok())
            .as_deref()
    }

    fn api_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url).header("Accept", "application/vnd.github+json");
        if let Some(token) = self.auth_token() {
            req = req.bearer_auth(token);
        }
        req
    }

    fn parse_target(url: &Url) -> Result<GitTarget> {
        let host = url.host_str().unwrap_or_default();
        if host != "github.com" {
            return Err(DocIndexError::validation(format!("unsupported git host: {host}")));
        }

        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        let (owner, repo) = match (segments.first(), segments.get(1)) {
            (Some(owner), Some(repo)) => (owner.to_string(), repo.trim_end_matches(".git").to_string()),
            _ => return Err(DocIndexError::validation(format!("not a repository URL: {url}"))),
        };

        match segments.get(2).copied() {
            Some("wiki") => Ok(GitTarget::Wiki { owner, repo }),
            Some("blob") => {
                let branch = segments.get(3).map(|s| s.to_string());
                let path = segments.get(4..).map(|s| s.join("/")).unwrap_or_default();
                Ok(GitTarget::Blob { owner, repo, branch, path })
            }
            _ => Ok(GitTarget::Repo { owner, repo }),
        }
    }

    async fn resolve_default_branch(&self, owner: &str, repo: &str, ctx: &JobCtx) -> Result<String> {
        ctx.git_default_branch
            .get_or_try_init(|| self.fetch_default_branch(owner, repo))
            .await
            .cloned()
    }

    async fn fetch_default_branch(&self, owner: &str, repo: &str) -> Result<String> {
        let api_url = format!("https://api.github.com/repos/{owner}/{repo}");
        let body: Value = self
            .api_request(&api_url)
            .send()
            .await
            .map_err(|e| DocIndexError::Network(format!("{api_url}: {e}")))?
            .json()
            .await
            .map_err(|e| DocIndexError::Network(format!("{api_url}: invalid JSON: {e}")))?;

        body.get("default_branch")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DocIndexError::parse(format!("{api_url}: missing 'default_branch'")))
    }

    fn raw_url(owner: &str, repo: &str, branch: &str, path: &str) -> Result<Url> {
        let raw = format!("https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{path}");
        Url::parse(&raw).map_err(|e| DocIndexError::validation(format!("invalid raw URL {raw}: {e}")))
    }

    /// Boxed explicitly (rather than left as a plain `async fn`) since the
    /// directory recursion below calls this function from within itself.
    fn enumerate_contents<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        branch: &'a str,
        path: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Url>>> + Send + 'a>> {
        Box::pin(async move {
            let api_url = if path.is_empty() {
                format!("https://api.github.com/repos/{owner}/{repo}/contents?ref={branch}")
            } else {
                format!("https://api.github.com/repos/{owner}/{repo}/contents/{path}?ref={branch}")
            };

            let entries: Vec<ContentsEntry> = self
                .api_request(&api_url)
                .send()
                .await
                .map_err(|e| DocIndexError::Network(format!("{api_url}: {e}")))?
                .json()
                .await
                .map_err(|e| DocIndexError::Network(format!("{api_url}: invalid JSON: {e}")))?;

            let mut urls = Vec::new();
            for entry in entries {
                match entry.kind.as_str() {
                    "dir" => {
                        urls.extend(self.enumerate_contents(owner, repo, branch, &entry.path).await?);
                    }
                    "file" if mime_by_extension(std::path::Path::new(&entry.name)).is_some() => {
                        if let Some(download_url) = entry.download_url {
                            if let Ok(url) = Url::parse(&download_url) {
                                urls.push(url);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(urls)
        })
    }
}

impl Default for GitHostingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for GitHostingStrategy {
    fn name(&self) -> &'static str {
        "git_hosting"
    }

    fn matches(&self, input: &ScrapeInput) -> bool {
        matches!(input, ScrapeInput::GitHosting(_))
    }

    async fn seed(&self, ctx: &JobCtx) -> Result<Vec<QueueItem>> {
        let ScrapeInput::GitHosting(url) = &ctx.input else {
            return Err(DocIndexError::validation("GitHostingStrategy requires a GitHosting input"));
        };

        match Self::parse_target(url)? {
            GitTarget::Wiki { owner, repo } => {
                let home = format!("https://github.com/{owner}/{repo}/wiki");
                let url = Url::parse(&home).map_err(|e| DocIndexError::validation(format!("invalid wiki URL {home}: {e}")))?;
                Ok(vec![QueueItem::seed(url)])
            }
            GitTarget::Blob { owner, repo, branch, path } => {
                let branch = match branch {
                    Some(b) => b,
                    None => self.resolve_default_branch(&owner, &repo, ctx).await?,
                };
                Ok(vec![QueueItem::seed(Self::raw_url(&owner, &repo, &branch, &path)?)])
            }
            GitTarget::Repo { owner, repo } => {
                let branch = self.resolve_default_branch(&owner, &repo, ctx).await?;
                let urls = self.enumerate_contents(&owner, &repo, &branch, "").await?;
                Ok(urls.into_iter().map(QueueItem::seed).collect())
            }
        }
    }

    async fn fetch(&self, item: &QueueItem, ctx: &JobCtx) -> Result<FetchOutcome> {
        self.web.fetch(item, ctx).await
    }

    fn discover_links(&self, page: &FetchedPage) -> Vec<Url> {
        if page.url.host_str() == Some("github.com") {
            self.web.discover_links(page)
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_git_hosting_input() {
        let strategy = GitHostingStrategy::new();
        assert!(strategy.matches(&ScrapeInput::GitHosting(Url::parse("https://github.com/example/repo").unwrap())));
        assert!(!strategy.matches(&ScrapeInput::Web(Url::parse("https://example.com").unwrap())));
    }

    #[test]
    fn parse_target_recognizes_wiki_blob_and_repo_root() {
        let repo = Url::parse("https://github.com/owner/repo").unwrap();
        assert!(matches!(GitHostingStrategy::parse_target(&repo).unwrap(), GitTarget::Repo { .. }));

        let wiki = Url::parse("https://github.com/owner/repo/wiki").unwrap();
        assert!(matches!(GitHostingStrategy::parse_target(&wiki).unwrap(), GitTarget::Wiki { .. }));

        let blob = Url::parse("https://github.com/owner/repo/blob/main/docs/readme.md").unwrap();
        match GitHostingStrategy::parse_target(&blob).unwrap() {
            GitTarget::Blob { branch, path, .. } => {
                assert_eq!(branch.as_deref(), Some("main"));
                assert_eq!(path, "docs/readme.md");
            }
            other => panic!("expected Blob, got {other:?}"),
        }
    }

    #[test]
    fn parse_target_rejects_non_github_hosts() {
        let url = Url::parse("https://gitlab.com/owner/repo").unwrap();
        assert!(GitHostingStrategy::parse_target(&url).is_err());
    }
}
