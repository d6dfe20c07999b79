//! URL scope and filtering (spec.md §4.3): a generalization of
//! `contextbuilder_crawler::engine::CrawlScope`/`glob_to_regex`/`in_scope`
//! from a single "must share path prefix with start URL" rule into four
//! selectable scope kinds, still combined with user include/exclude globs
//! the same way the teacher does.

use serde::{Deserialize, Serialize};
use url::Url;

/// How far from the start URL a discovered link may range and still be
/// followed. The teacher only ever implements [`ScopeKind::Subpages`]
/// (implicit, not configurable); the other three are new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Same host, path must share the start URL's path prefix.
    Subpages,
    /// Same host, any path.
    Hostname,
    /// Same registrable domain, any subdomain.
    Domain,
    /// No host/path restriction at all (only include/exclude apply).
    Any,
}

/// Scope ∧ include ∧ ¬exclude (spec.md §4.3). User-supplied patterns
/// *replace* the defaults rather than adding to them; `llms.txt`/
/// `llms-full.txt` are always excluded regardless of user configuration, so
/// seeded discovery output is never re-crawled as a regular page.
pub struct UrlFilter {
    kind: ScopeKind,
    base_host: String,
    base_domain: String,
    base_path: String,
    include: Vec<regex::Regex>,
    exclude: Vec<regex::Regex>,
}

impl UrlFilter {
    pub fn new(start_url: &Url, kind: ScopeKind, include_patterns: &[String], exclude_patterns: &[String]) -> Self {
        let base_host = start_url.host_str().unwrap_or("").to_string();
        let base_domain = registrable_domain(&base_host);
        let base_path = start_url.path().to_string();

        let include = include_patterns.iter().filter_map(|p| glob_to_regex(p)).collect();
        let exclude = exclude_patterns.iter().filter_map(|p| glob_to_regex(p)).collect();

        Self {
            kind,
            base_host,
            base_domain,
            base_path,
            include,
            exclude,
        }
    }

    pub fn in_scope(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        if is_llms_txt_path(url.path()) {
            return false;
        }

        if !self.within_scope_kind(url) {
            return false;
        }

        let path = url.path();

        if self.exclude.iter().any(|p| p.is_match(path)) {
            return false;
        }

        if !self.include.is_empty() {
            return self.include.iter().any(|p| p.is_match(path));
        }

        true
    }

    fn within_scope_kind(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or("");
        match self.kind {
            ScopeKind::Subpages => {
                host == self.base_host
                    && (url.path().starts_with(&self.base_path) || self.base_path.starts_with(url.path()))
            }
            ScopeKind::Hostname => host == self.base_host,
            ScopeKind::Domain => registrable_domain(host) == self.base_domain,
            ScopeKind::Any => true,
        }
    }
}

fn is_llms_txt_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name == "llms.txt" || name == "llms-full.txt"
}

/// Best-effort registrable domain: last two labels (e.g. `docs.example.com`
/// → `example.com`). Good enough for scope comparison; not a full public
/// suffix list implementation.
fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

/// Convert a glob-like pattern (`*`, `**`, `?`) to an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

/// Normalize a URL for deduplication: strip fragment, drop a trailing slash
/// (except on the bare origin).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(kind: ScopeKind, start: &str, include: &[&str], exclude: &[&str]) -> UrlFilter {
        let start_url = Url::parse(start).unwrap();
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        UrlFilter::new(&start_url, kind, &include, &exclude)
    }

    #[test]
    fn subpages_requires_shared_path_prefix() {
        let f = filter(ScopeKind::Subpages, "https://docs.example.com/guide/", &[], &[]);
        assert!(f.in_scope(&Url::parse("https://docs.example.com/guide/intro").unwrap()));
        assert!(!f.in_scope(&Url::parse("https://docs.example.com/blog/post").unwrap()));
        assert!(!f.in_scope(&Url::parse("https://other.example.com/guide/intro").unwrap()));
    }

    #[test]
    fn hostname_ignores_path() {
        let f = filter(ScopeKind::Hostname, "https://docs.example.com/guide/", &[], &[]);
        assert!(f.in_scope(&Url::parse("https://docs.example.com/blog/post").unwrap()));
        assert!(!f.in_scope(&Url::parse("https://other.example.com/guide/intro").unwrap()));
    }

    #[test]
    fn domain_allows_subdomains() {
        let f = filter(ScopeKind::Domain, "https://docs.example.com/", &[], &[]);
        assert!(f.in_scope(&Url::parse("https://blog.example.com/post").unwrap()));
        assert!(!f.in_scope(&Url::parse("https://docs.other.com/post").unwrap()));
    }

    #[test]
    fn any_allows_cross_domain() {
        let f = filter(ScopeKind::Any, "https://docs.example.com/", &[], &[]);
        assert!(f.in_scope(&Url::parse("https://completely-different.org/page").unwrap()));
    }

    #[test]
    fn excludes_take_priority_over_include() {
        let f = filter(
            ScopeKind::Hostname,
            "https://docs.example.com/",
            &["/blog/**"],
            &["/blog/drafts/**"],
        );
        assert!(f.in_scope(&Url::parse("https://docs.example.com/blog/post").unwrap()));
        assert!(!f.in_scope(&Url::parse("https://docs.example.com/blog/drafts/wip").unwrap()));
    }

    #[test]
    fn llms_txt_always_excluded() {
        let f = filter(ScopeKind::Any, "https://docs.example.com/", &[], &[]);
        assert!(!f.in_scope(&Url::parse("https://docs.example.com/llms.txt").unwrap()));
        assert!(!f.in_scope(&Url::parse("https://docs.example.com/docs/llms-full.txt").unwrap()));
    }

    #[test]
    fn normalize_strips_fragment_and_trailing_slash() {
        let url = Url::parse("https://docs.example.com/guide/intro/#section-1").unwrap();
        let normalized = normalize_url(&url);
        assert_eq!(normalized, "https://docs.example.com/guide/intro");
    }
}
