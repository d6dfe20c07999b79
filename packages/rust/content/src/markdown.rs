//! Markdown pipeline (spec.md §4.2): front-matter extraction, link
//! resolution, otherwise pass through unchanged.

use std::sync::LazyLock;

use regex::Regex;

use docindex_shared::Result;

use crate::html::cleanup_links as resolve_links;
use crate::{Body, PipelineContext};

pub async fn run(ctx: &mut PipelineContext) -> Result<()> {
    let text = match &ctx.body {
        Body::Text(s) => s.clone(),
        Body::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
    };

    let (frontmatter, body) = split_frontmatter(&text);
    if let Some(fm) = &frontmatter {
        ctx.metadata.title = extract_frontmatter_field(fm, "title").or_else(|| ctx.metadata.title.clone());
    }

    ctx.metadata.title = ctx
        .metadata
        .title
        .clone()
        .or_else(|| extract_first_h1(&body));

    let resolved = resolve_links(&body, &ctx.source);
    ctx.body = Body::Text(resolved);
    Ok(())
}

/// Split a leading `---\n...\n---` YAML front-matter block off the body, if
/// present.
fn split_frontmatter(md: &str) -> (Option<String>, String) {
    let Some(rest) = md.strip_prefix("---\n") else {
        return (None, md.to_string());
    };
    let Some(end) = rest.find("\n---\n") else {
        return (None, md.to_string());
    };
    let fm = rest[..end].to_string();
    let body = rest[end + "\n---\n".len()..].to_string();
    (Some(fm), body)
}

fn extract_frontmatter_field(fm: &str, key: &str) -> Option<String> {
    for line in fm.lines() {
        if let Some(rest) = line.strip_prefix(&format!("{key}:")) {
            let value = rest.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn extract_first_h1(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));
    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}
