//! Embedding generation (spec.md §4.5): a provider boundary plus the
//! batching/padding/split-on-size-error logic that sits in front of it.
//! Real providers are an external collaborator (spec.md §1 Non-goals); only
//! the trait and a deterministic [`NullProvider`] used in tests live here.

use async_trait::async_trait;
use docindex_shared::{DocIndexError, Result};

/// Failure surface for an embedding call, branched on by *kind* rather than
/// substring-matched provider error text (spec.md §9 design note).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    #[error("input too large for provider")]
    SizeLimit,
    #[error("authentication failed")]
    Auth,
    #[error("provider unreachable")]
    Unreachable,
    #[error("provider error {code}: {message}")]
    ProviderError { code: String, message: String },
}

impl From<EmbedError> for DocIndexError {
    fn from(err: EmbedError) -> Self {
        DocIndexError::Storage(format!("embedding failed: {err}"))
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Native output dimension `d` of this provider, before padding to D.
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError>;
}

/// Deterministic stand-in for a real provider: returns a zero vector of its
/// configured dimension for every input. Used to exercise the vector-search
/// path in tests without a network dependency.
pub struct NullProvider {
    dimension: usize,
}

impl NullProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for NullProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
    }
}

/// Zero-pads `vec` up to `target_dim`. A provider producing more than
/// `target_dim` dimensions is rejected at registration time (see
/// `Storage::with_embedding_provider`), so this never truncates.
fn pad(mut vec: Vec<f32>, target_dim: usize) -> Vec<f32> {
    if vec.len() < target_dim {
        vec.resize(target_dim, 0.0);
    }
    vec
}

/// Splits `text` at the nearest char boundary at or before its midpoint.
fn split_in_half(text: &str) -> &str {
    let mid = text.len() / 2;
    let mut boundary = mid;
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    &text[..boundary]
}

/// Embeds `texts`, recursively halving the batch (or, for a single
/// still-too-large text, halving the text itself and retrying just the
/// first half) on a [`EmbedError::SizeLimit`] (spec.md §4.5). Every returned
/// vector is zero-padded to `target_dim`.
pub fn embed_with_splitting<'a>(
    provider: &'a dyn EmbeddingProvider,
    texts: &'a [String],
    target_dim: usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>> {
    Box::pin(async move {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match provider.embed(texts).await {
            Ok(vectors) => Ok(vectors.into_iter().map(|v| pad(v, target_dim)).collect()),
            Err(EmbedError::SizeLimit) if texts.len() > 1 => {
                let mid = texts.len() / 2;
                let (left, right) = texts.split_at(mid);
                let mut left_vecs = embed_with_splitting(provider, left, target_dim).await?;
                let right_vecs = embed_with_splitting(provider, right, target_dim).await?;
                left_vecs.extend(right_vecs);
                Ok(left_vecs)
            }
            Err(EmbedError::SizeLimit) => {
                let truncated = split_in_half(&texts[0]).to_string();
                if truncated.is_empty() {
                    return Err(DocIndexError::Storage(
                        "embedding input too large even after halving to zero length".into(),
                    ));
                }
                let retry = vec![truncated];
                embed_with_splitting(provider, &retry, target_dim).await
            }
            Err(e) => Err(e.into()),
        }
    })
}

/// Splits `texts` into batches capped by both item count and total
/// character length (spec.md §4.5), preserving input order.
pub fn batch_by_count_and_chars(texts: &[String], max_count: usize, max_chars: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_chars = 0usize;

    for text in texts {
        let would_overflow_count = current.len() >= max_count.max(1);
        let would_overflow_chars = !current.is_empty() && current_chars + text.len() > max_chars;

        if would_overflow_count || would_overflow_chars {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        current_chars += text.len();
        current.push(text.clone());
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
