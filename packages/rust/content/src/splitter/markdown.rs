//! Phase-1 semantic splitter for Markdown (and already-converted HTML):
//! splits at heading boundaries H1–H6, keeps code fences/tables/lists atomic,
//! and assigns `section_path` from heading ancestry (spec.md §4.2).

use docindex_shared::ChunkTypes;

use super::SplitChunk;

pub fn split(text: &str) -> Vec<SplitChunk> {
    let mut chunks = Vec::new();
    let mut ancestry: Vec<String> = Vec::new();
    let mut current_level: u8 = 0;

    let mut buf = String::new();
    let mut buf_types = ChunkTypes::CONTENT;

    let mut in_code_fence = false;
    let mut in_table = false;

    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;

    macro_rules! flush {
        () => {
            if !buf.trim().is_empty() {
                chunks.push(SplitChunk::new(
                    buf.trim_end_matches('\n').to_string(),
                    current_level.max(1),
                    ancestry.clone(),
                    buf_types,
                ));
            }
            buf.clear();
            buf_types = ChunkTypes::CONTENT;
        };
    }

    while i < lines.len() {
        let line = lines[i];

        if let Some(fence_len) = code_fence_marker(line) {
            flush!();
            let mut block = String::from(line);
            block.push('\n');
            i += 1;
            while i < lines.len() {
                block.push_str(lines[i]);
                block.push('\n');
                let closed = code_fence_marker(lines[i]).is_some_and(|l| l >= fence_len);
                i += 1;
                if closed {
                    break;
                }
            }
            chunks.push(SplitChunk::new(
                block.trim_end_matches('\n').to_string(),
                current_level.max(1),
                ancestry.clone(),
                ChunkTypes::CONTENT | ChunkTypes::STRUCTURAL,
            ));
            let _ = in_code_fence;
            continue;
        }

        if let Some(level_text) = heading(line) {
            flush!();
            let (level, text) = level_text;
            ancestry.truncate((level - 1) as usize);
            ancestry.push(text);
            current_level = level;
            i += 1;
            continue;
        }

        if is_table_row(line) {
            if !in_table {
                flush!();
                in_table = true;
            }
            buf.push_str(line);
            buf.push('\n');
            buf_types = ChunkTypes::CONTENT | ChunkTypes::STRUCTURAL;
            i += 1;
            if i >= lines.len() || !is_table_row(lines[i]) {
                flush!();
                in_table = false;
            }
            continue;
        }

        if is_list_item(line) {
            buf_types = ChunkTypes::CONTENT | ChunkTypes::STRUCTURAL;
        }

        buf.push_str(line);
        buf.push('\n');
        i += 1;
    }
    flush!();

    if chunks.is_empty() {
        chunks.push(SplitChunk::new(text.trim_end_matches('\n').to_string(), 1, Vec::new(), ChunkTypes::CONTENT));
    }

    chunks
}

fn heading(line: &str) -> Option<(u8, String)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = trimmed[hashes..].trim();
    if rest.is_empty() {
        return None;
    }
    Some((hashes as u8, rest.to_string()))
}

fn code_fence_marker(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some(trimmed.chars().take_while(|&c| c == '`').count())
    } else {
        None
    }
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 1
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ")
        || t.split_once(". ").is_some_and(|(p, _)| p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty())
}
