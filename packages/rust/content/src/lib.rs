//! Per-content-type middleware pipelines feeding the two-phase splitter
//! (spec.md §4.2).
//!
//! A [`PipelineContext`] is the mutable state every [`Middleware`] stage
//! reads and writes — the redesign flag "middleware chain with mutable
//! shared context → linear pipeline fn(ctx, next)" (spec.md §9): the context
//! is owned by [`process`] and handed to each stage by exclusive reference,
//! never shared.

pub mod html;
pub mod markdown;
pub mod splitter;

use async_trait::async_trait;
use tracing::instrument;
use url::Url;

use docindex_shared::{DocIndexError, Result, SplitterSection};

pub use splitter::SplitChunk;

/// Which per-content-type pipeline a fetched document should run through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Markdown,
    Json,
    SourceCode,
    Text,
}

impl ContentType {
    /// Classify a negotiated MIME type (spec.md §4.2: "if an upstream
    /// response is negotiated as `text/markdown` or `text/plain`, the HTML
    /// stages are skipped").
    pub fn from_mime(mime: &str) -> Self {
        let base = mime.split(';').next().unwrap_or(mime).trim();
        match base {
            "text/html" | "application/xhtml+xml" => Self::Html,
            "text/markdown" => Self::Markdown,
            "application/json" | "text/json" => Self::Json,
            "text/plain" => Self::Text,
            other if is_source_code_mime(other) => Self::SourceCode,
            _ => Self::Text,
        }
    }
}

fn is_source_code_mime(mime: &str) -> bool {
    mime.starts_with("text/x-") || mime == "application/javascript" || mime == "text/javascript"
}

/// A fetched document's body, before or after conversion.
#[derive(Debug, Clone)]
pub enum Body {
    Bytes(Vec<u8>),
    Text(String),
}

impl Body {
    pub fn into_text(self) -> Result<String> {
        match self {
            Body::Text(s) => Ok(s),
            Body::Bytes(b) => {
                String::from_utf8(b).map_err(|e| DocIndexError::parse(format!("non-utf8 body: {e}")))
            }
        }
    }
}

/// Metadata extracted from the document itself (title, etc.), separate from
/// the `Page` row metadata the caller already knows (url, etag, depth).
#[derive(Debug, Clone, Default)]
pub struct PageMetadata {
    pub title: Option<String>,
}

/// How aggressively the HTML pipeline should render dynamic content
/// (mirrors job-level render options, not a literal config field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Never,
    Auto,
    Playwright,
}

/// Options threaded through a pipeline run; distinct from `PipelineContext`
/// because these are inputs the caller fixes up front, not state the stages
/// mutate.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub render_mode: RenderMode,
    /// CSS selectors to strip in `SanitizeStage`; empty means "use the
    /// built-in default chrome list".
    pub sanitize_selectors: Vec<String>,
    /// Revert sanitization if it would drop more than this fraction of
    /// textual content (spec.md §4.2).
    pub sanitize_safety_threshold: f32,
    pub splitter: SplitterSection,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Auto,
            sanitize_selectors: Vec::new(),
            sanitize_safety_threshold: 0.6,
            splitter: SplitterSection::default(),
        }
    }
}

/// The mutable state shared by every stage of one pipeline run (spec.md
/// §4.2).
pub struct PipelineContext {
    pub source: Url,
    pub body: Body,
    pub content_type: ContentType,
    pub metadata: PageMetadata,
    pub discovered_links: Vec<Url>,
    pub errors: Vec<String>,
    pub options: PipelineOptions,
}

impl PipelineContext {
    pub fn new(source: Url, body: Body, content_type: ContentType, options: PipelineOptions) -> Self {
        Self {
            source,
            body,
            content_type,
            metadata: PageMetadata::default(),
            discovered_links: Vec::new(),
            errors: Vec::new(),
            options,
        }
    }
}

/// One stage of a content pipeline. Stages run in order and may
/// short-circuit by returning `Err`; a stage that only wants to record a
/// recoverable problem pushes to `ctx.errors` and returns `Ok(())`.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn run(&self, ctx: &mut PipelineContext) -> Result<()>;
}

/// Outcome of running a document through its pipeline and splitter: ready to
/// be persisted as a `Page` + ordered `Chunk`s by the caller.
pub struct ProcessedDocument {
    pub title: Option<String>,
    pub markdown: String,
    pub discovered_links: Vec<Url>,
    pub chunks: Vec<SplitChunk>,
    pub errors: Vec<String>,
}

/// Run the content type's pipeline, then the two-phase splitter, over a
/// fetched document (spec.md §4.2 end to end).
#[instrument(skip(body), fields(url = %source, ?content_type))]
pub async fn process(
    source: Url,
    body: Body,
    content_type: ContentType,
    options: PipelineOptions,
) -> Result<ProcessedDocument> {
    let splitter_cfg = options.splitter.clone();
    let mut ctx = PipelineContext::new(source, body, content_type, options);

    match content_type {
        ContentType::Html => html::run(&mut ctx).await?,
        ContentType::Markdown => markdown::run(&mut ctx).await?,
        ContentType::Json | ContentType::SourceCode | ContentType::Text => {
            // Pass-through: no transformation stages beyond reading the body
            // as text (spec.md §4.2: "Text pipeline: fallback; no
            // transformation").
        }
    }

    let text = ctx.body.into_text()?;
    let chunks = splitter::semantic_split(content_type, &text, &splitter_cfg);
    let chunks = splitter::greedy_optimize(chunks, &splitter_cfg);

    Ok(ProcessedDocument {
        title: ctx.metadata.title,
        markdown: text,
        discovered_links: ctx.discovered_links,
        chunks,
        errors: ctx.errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_mime_classifies_known_types() {
        assert_eq!(ContentType::from_mime("text/html; charset=utf-8"), ContentType::Html);
        assert_eq!(ContentType::from_mime("text/markdown"), ContentType::Markdown);
        assert_eq!(ContentType::from_mime("application/json"), ContentType::Json);
        assert_eq!(ContentType::from_mime("text/x-rust"), ContentType::SourceCode);
        assert_eq!(ContentType::from_mime("text/plain"), ContentType::Text);
    }

    #[tokio::test]
    async fn process_markdown_passthrough_splits_chunks() {
        let doc = process(
            Url::parse("https://example.com/guide").unwrap(),
            Body::Text("# Title\n\nSome body text.\n".into()),
            ContentType::Markdown,
            PipelineOptions::default(),
        )
        .await
        .unwrap();

        assert!(!doc.chunks.is_empty());
        assert_eq!(doc.title.as_deref(), Some("Title"));
    }
}
