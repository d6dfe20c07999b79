//! Phase-1 semantic splitter for plain text: line-based grouping with a
//! shallow path (spec.md §4.2) — paragraphs (blank-line-separated runs) each
//! become one chunk.

use docindex_shared::ChunkTypes;

use super::SplitChunk;

pub fn split(text: &str) -> Vec<SplitChunk> {
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !buf.trim().is_empty() {
                chunks.push(SplitChunk::new(buf.trim_end_matches('\n').to_string(), 1, Vec::new(), ChunkTypes::CONTENT));
                buf.clear();
            }
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    if !buf.trim().is_empty() {
        chunks.push(SplitChunk::new(buf.trim_end_matches('\n').to_string(), 1, Vec::new(), ChunkTypes::CONTENT));
    }

    if chunks.is_empty() {
        chunks.push(SplitChunk::new(text.to_string(), 1, Vec::new(), ChunkTypes::CONTENT));
    }
    chunks
}
