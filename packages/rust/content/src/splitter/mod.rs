//! The two-phase splitter (spec.md §4.2): Phase 1 picks semantic boundaries
//! per content type, Phase 2 greedily merges the resulting chunks toward
//! `preferredChunkSize` under three constraints. Entirely new — the teacher
//! stores whole-page Markdown files and has no splitter to generalize from.

mod json;
mod markdown;
mod source;
mod text;

use docindex_shared::{ChunkMetadata, ChunkTypes, SectionPath, SplitterSection};

use crate::ContentType;

/// One chunk produced by Phase 1 or Phase 2, not yet assigned a `sort_order`
/// or `page_id` (those are the caller's job, once it has a page row to
/// attach to).
#[derive(Debug, Clone)]
pub struct SplitChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl SplitChunk {
    fn new(content: impl Into<String>, level: u8, path: Vec<String>, types: ChunkTypes) -> Self {
        Self {
            content: content.into(),
            metadata: ChunkMetadata {
                section_level: level,
                section_path: SectionPath(path),
                types,
            },
        }
    }
}

/// Phase 1: dispatch to the content type's semantic splitter.
pub fn semantic_split(content_type: ContentType, text: &str, cfg: &SplitterSection) -> Vec<SplitChunk> {
    match content_type {
        ContentType::Html | ContentType::Markdown => markdown::split(text),
        ContentType::Json => json::split(text, cfg.max_chunk_size),
        ContentType::SourceCode => source::split(text),
        ContentType::Text => text::split(text),
    }
}

/// Phase 2: greedily merge adjacent Phase-1 chunks toward
/// `preferredChunkSize`, under the three rules of spec.md §4.2:
///
/// 1. Hard ceiling — a merge that would exceed `maxChunkSize` is rejected.
/// 2. Structure wins over size — don't merge across a major (H1/H2) section
///    boundary once the accumulator already reached `minChunkSize`.
/// 3. Size-minimum — while under `minChunkSize`, merge unconditionally
///    (subject to rule 1).
pub fn greedy_optimize(chunks: Vec<SplitChunk>, cfg: &SplitterSection) -> Vec<SplitChunk> {
    if chunks.is_empty() {
        return chunks;
    }

    let mut out: Vec<SplitChunk> = Vec::new();
    let mut acc: Option<SplitChunk> = None;

    for next in chunks {
        let Some(current) = acc.take() else {
            acc = Some(next);
            continue;
        };

        let merged_len = merged_len(&current.content, &next.content);
        let starts_major_section = next.metadata.section_level <= 2
            && !current.metadata.section_path.same_section(&next.metadata.section_path);

        let current_len = current.content.len();

        if merged_len > cfg.max_chunk_size {
            // Rule 1: hard ceiling — flush current, start fresh with next.
            out.push(current);
            acc = Some(next);
        } else if current_len >= cfg.min_chunk_size && starts_major_section {
            // Rule 2: structure wins over size.
            out.push(current);
            acc = Some(next);
        } else if current_len < cfg.min_chunk_size {
            // Rule 3: size-minimum — merge unconditionally (ceiling already checked).
            acc = Some(fuse(current, next));
        } else {
            // Neither rule forces a split nor a merge; keep growing toward
            // `preferredChunkSize` as long as we don't exceed it.
            if merged_len <= cfg.preferred_chunk_size {
                acc = Some(fuse(current, next));
            } else {
                out.push(current);
                acc = Some(next);
            }
        }
    }

    if let Some(last) = acc {
        out.push(last);
    }

    out
}

fn merged_len(a: &str, b: &str) -> usize {
    let sep = if a.ends_with('\n') { 0 } else { 1 };
    a.len() + sep + b.len()
}

/// Fuse two adjacent chunks' content and metadata (spec.md §4.2): level =
/// min, path = longest common prefix (or the descendant path if one contains
/// the other), types = union.
fn fuse(a: SplitChunk, b: SplitChunk) -> SplitChunk {
    let mut content = a.content;
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&b.content);

    let level = a.metadata.section_level.min(b.metadata.section_level);
    let path = longest_common_prefix(&a.metadata.section_path, &b.metadata.section_path);
    let types = a.metadata.types | b.metadata.types;

    SplitChunk {
        content,
        metadata: ChunkMetadata {
            section_level: level,
            section_path: path,
            types,
        },
    }
}

fn longest_common_prefix(a: &SectionPath, b: &SectionPath) -> SectionPath {
    if a.is_prefix_of(b) {
        return b.clone();
    }
    if b.is_prefix_of(a) {
        return a.clone();
    }
    let mut prefix = Vec::new();
    for (x, y) in a.0.iter().zip(b.0.iter()) {
        if x == y {
            prefix.push(x.clone());
        } else {
            break;
        }
    }
    SectionPath(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min: usize, preferred: usize, max: usize) -> SplitterSection {
        SplitterSection {
            min_chunk_size: min,
            preferred_chunk_size: preferred,
            max_chunk_size: max,
        }
    }

    fn chunk(content: &str) -> SplitChunk {
        SplitChunk::new(content, 1, vec!["Guide".into()], ChunkTypes::CONTENT)
    }

    /// spec.md §8 scenario 1: five chunks of size 200, 300, 900, 1600, 200
    /// under one H1, min=500 preferred=1500 max=5000. The binding property
    /// (stated explicitly in the scenario) is: no output chunk is below
    /// `minChunkSize` unless it is the last one, and none exceeds
    /// `maxChunkSize`.
    #[test]
    fn greedy_split_scenario_1() {
        let sizes = [200, 300, 900, 1600, 200];
        let chunks: Vec<SplitChunk> = sizes
            .iter()
            .map(|n| chunk(&"a".repeat(*n)))
            .collect();

        let cfg = cfg(500, 1500, 5000);
        let out = greedy_optimize(chunks, &cfg);

        assert!(out.iter().all(|c| c.content.len() <= cfg.max_chunk_size));
        for (i, c) in out.iter().enumerate() {
            let is_last = i == out.len() - 1;
            if !is_last {
                assert!(
                    c.content.len() >= cfg.min_chunk_size,
                    "non-last chunk {i} has size {} < min {}",
                    c.content.len(),
                    cfg.min_chunk_size
                );
            }
        }
    }

    #[test]
    fn hard_ceiling_rejects_merge_that_would_exceed_max() {
        let chunks = vec![chunk(&"a".repeat(400)), chunk(&"b".repeat(400))];
        let cfg = cfg(100, 200, 500);
        let out = greedy_optimize(chunks, &cfg);
        assert_eq!(out.len(), 2, "merge would be 801 bytes > max 500");
    }

    #[test]
    fn size_minimum_merges_small_chunks_unconditionally() {
        let chunks = vec![chunk("a"), chunk("b"), chunk("c")];
        let cfg = cfg(1000, 2000, 5000);
        let out = greedy_optimize(chunks, &cfg);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn structure_wins_splits_at_major_section_once_min_reached() {
        let mut first = chunk(&"a".repeat(600));
        first.metadata.section_path = SectionPath(vec!["Guide".into()]);
        let mut second = chunk(&"b".repeat(100));
        second.metadata.section_level = 1;
        second.metadata.section_path = SectionPath(vec!["Reference".into()]);

        let cfg = cfg(500, 2000, 5000);
        let out = greedy_optimize(vec![first, second], &cfg);
        assert_eq!(out.len(), 2, "should split at the unrelated H1 boundary");
    }

    #[test]
    fn fuse_takes_min_level_and_common_prefix_and_union_types() {
        let mut a = chunk("left");
        a.metadata.section_level = 2;
        a.metadata.section_path = SectionPath(vec!["Guide".into(), "Install".into()]);
        a.metadata.types = ChunkTypes::CONTENT;

        let mut b = chunk("right");
        b.metadata.section_level = 3;
        b.metadata.section_path = SectionPath(vec!["Guide".into(), "Install".into(), "Step".into()]);
        b.metadata.types = ChunkTypes::STRUCTURAL;

        let fused = fuse(a, b);
        assert_eq!(fused.metadata.section_level, 2);
        assert_eq!(fused.metadata.section_path.0, vec!["Guide", "Install", "Step"]);
        assert_eq!(fused.metadata.types, ChunkTypes::CONTENT | ChunkTypes::STRUCTURAL);
        assert_eq!(fused.content, "left\nright");
    }
}
