//! Local-file fetcher: reads from disk, classifies MIME by extension with a
//! content-sniffing fallback (spec.md §4.1).

use async_trait::async_trait;
use url::Url;

use crate::{Fetched, FetchError, FetchOpts, Fetcher, Probed};

pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        Self
    }

    fn path_from_url(url: &Url) -> Result<std::path::PathBuf, FetchError> {
        url.to_file_path().map_err(|_| FetchError::Permanent {
            url: url.to_string(),
            message: "not a valid file:// URL".into(),
        })
    }
}

impl Default for FileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Guess MIME type from a file extension, matching the teacher's
/// extension-suffix style (`url_to_path`'s `.html`/`.htm`/`.md` trimming)
/// generalized into a full lookup table.
pub fn mime_by_extension(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "txt" => "text/plain",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "js" | "mjs" => "text/javascript",
        "ts" => "text/x-typescript",
        "go" => "text/x-go",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        _ => return None,
    })
}

/// Fall back to sniffing the first bytes when the extension is unknown or
/// missing.
fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"{") || bytes.starts_with(b"[") {
        "application/json"
    } else if std::str::from_utf8(bytes).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, url: &Url, _opts: &FetchOpts) -> Result<Fetched, FetchError> {
        let path = Self::path_from_url(url)?;
        let body = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound {
                    url: url.to_string(),
                }
            } else {
                FetchError::Permanent {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let content_type = mime_by_extension(&path)
            .map(String::from)
            .unwrap_or_else(|| sniff(&body).to_string());

        Ok(Fetched {
            url: url.clone(),
            status: 200,
            content_type,
            body,
            etag: None,
            last_modified: None,
            discovered_links: Vec::new(),
        })
    }

    async fn probe(&self, url: &Url, _opts: &FetchOpts) -> Result<Probed, FetchError> {
        let path = Self::path_from_url(url)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|_| FetchError::NotFound {
            url: url.to_string(),
        })?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs().to_string());

        Ok(Probed::Modified {
            etag: None,
            last_modified,
        })
    }
}
