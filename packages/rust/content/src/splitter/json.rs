//! Phase-1 semantic splitter for JSON: splits at object/property boundaries,
//! producing a path like `[foo, bar, 3]`; deep structures are flattened
//! (recursed into) until every chunk body fits under `maxChunkSize`
//! (spec.md §4.2).

use docindex_shared::ChunkTypes;
use serde_json::Value;

use super::SplitChunk;

pub fn split(text: &str, max_chunk_size: usize) -> Vec<SplitChunk> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            // Not valid JSON (or a JSON stream): fall back to one opaque chunk.
            return vec![SplitChunk::new(text.trim_end_matches('\n').to_string(), 1, Vec::new(), ChunkTypes::CONTENT)];
        }
    };

    let mut chunks = Vec::new();
    walk(&value, &mut Vec::new(), max_chunk_size, &mut chunks);
    if chunks.is_empty() {
        chunks.push(SplitChunk::new("null".to_string(), 1, Vec::new(), ChunkTypes::CONTENT));
    }
    chunks
}

fn walk(value: &Value, path: &mut Vec<String>, max_chunk_size: usize, out: &mut Vec<SplitChunk>) {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
    let level = path.len().min(u8::MAX as usize) as u8;

    if rendered.len() <= max_chunk_size {
        out.push(SplitChunk::new(rendered, level.max(1), path.clone(), ChunkTypes::CONTENT));
        return;
    }

    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, max_chunk_size, out);
                path.pop();
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                walk(child, path, max_chunk_size, out);
                path.pop();
            }
        }
        _ => {
            // A leaf (or empty container) too large to shrink further; emit
            // truncated rather than lose the boundary entirely.
            let mut truncated = rendered;
            truncated.truncate(max_chunk_size);
            out.push(SplitChunk::new(truncated, level.max(1), path.clone(), ChunkTypes::CONTENT));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_object_is_a_single_chunk() {
        let chunks = split(r#"{"foo": {"bar": [1, 2, 3]}}"#, 10_000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.section_path.0, Vec::<String>::new());
    }

    #[test]
    fn large_object_splits_at_property_boundaries() {
        let big_array: Vec<i32> = (0..2000).collect();
        let json = serde_json::json!({ "small": 1, "big": big_array }).to_string();
        let chunks = split(&json, 500);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().any(|c| c.metadata.section_path.0 == vec!["small".to_string()]));
        assert!(chunks.iter().all(|c| c.content.len() <= 500 || c.metadata.section_path.0.len() > 1));
    }

    #[test]
    fn invalid_json_falls_back_to_one_chunk() {
        let chunks = split("not json", 500);
        assert_eq!(chunks.len(), 1);
    }
}
