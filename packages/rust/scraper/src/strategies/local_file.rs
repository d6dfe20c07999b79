//! Local directory/file strategy (spec.md §4.3): recursively walks a
//! directory with `walkdir` — no teacher module walks a filesystem tree, so
//! this crate is the one adopting it (see DESIGN.md).

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use docindex_fetch::file::{mime_by_extension, FileFetcher};
use docindex_fetch::{FetchOpts, Fetcher};
use docindex_shared::{DocIndexError, Result};

use crate::{FetchOutcome, FetchedPage, JobCtx, QueueItem, ScrapeInput, Strategy};

pub struct LocalFileStrategy {
    fetcher: FileFetcher,
}

impl LocalFileStrategy {
    pub fn new() -> Self {
        Self {
            fetcher: FileFetcher::new(),
        }
    }
}

impl Default for LocalFileStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn path_to_file_url(path: &std::path::Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|_| DocIndexError::validation(format!("not an absolute path: {}", path.display())))
}

#[async_trait]
impl Strategy for LocalFileStrategy {
    fn name(&self) -> &'static str {
        "local_file"
    }

    fn matches(&self, input: &ScrapeInput) -> bool {
        matches!(input, ScrapeInput::LocalPath(_))
    }

    /// The full frontier is known up front — a recursive walk, not a
    /// link-following BFS — so every file is seeded at depth 0 and
    /// `discover_links` stays a no-op.
    async fn seed(&self, ctx: &JobCtx) -> Result<Vec<QueueItem>> {
        let ScrapeInput::LocalPath(root) = &ctx.input else {
            return Err(DocIndexError::validation("LocalFileStrategy requires a LocalPath input"));
        };

        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|e| DocIndexError::io(root.clone(), e))?;

        let paths: Vec<PathBuf> = if metadata.is_file() {
            vec![root.clone()]
        } else {
            walkdir::WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| mime_by_extension(entry.path()).is_some())
                .map(|entry| entry.into_path())
                .collect()
        };

        paths
            .into_iter()
            .map(|path| path_to_file_url(&path).map(QueueItem::seed))
            .collect()
    }

    async fn fetch(&self, item: &QueueItem, ctx: &JobCtx) -> Result<FetchOutcome> {
        let opts = FetchOpts {
            signal: Some(ctx.cancellation.clone()),
            ..Default::default()
        };

        match self.fetcher.fetch(&item.url, &opts).await {
            Ok(fetched) => Ok(FetchOutcome::Fetched(FetchedPage {
                url: fetched.url,
                depth: item.depth,
                from_llms_txt: false,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobMode, ScraperOptions};

    #[tokio::test]
    async fn seeds_every_recognized_file_in_a_directory() {
        let dir = tempfile_dir("docindex-local-strategy-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.md"), "# A").unwrap();
        std::fs::write(dir.join("b.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.join("ignore.bin"), [0u8, 1, 2]).unwrap();

        let strategy = LocalFileStrategy::new();
        let ctx = JobCtx::new(ScrapeInput::LocalPath(dir.clone()), ScraperOptions::default(), JobMode::Scrape);

        let items = strategy.seed(&ctx).await.unwrap();
        assert_eq!(items.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn tempfile_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}-{}", std::process::id()))
    }
}
