//! Phase-1 semantic splitter for source code: boundary detection by a
//! brace/indentation heuristic rather than a real parser. spec.md §4.2 calls
//! for "tree-sitter-style boundary detection"; tree-sitter itself is not in
//! any pack crate's dependency table (see DESIGN.md), so this is a
//! line-and-brace heuristic scoped down from that ideal — it finds
//! top-level function/class/module definitions and emits the material
//! between them as structural scaffolding chunks.

use std::sync::LazyLock;

use docindex_shared::ChunkTypes;
use regex::Regex;

use super::SplitChunk;

static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(pub(\(\w+\))?\s+)?(async\s+)?(fn|struct|enum|trait|impl|class|def|function|module|interface)\s+\w",
    )
    .expect("valid regex")
});

pub fn split(text: &str) -> Vec<SplitChunk> {
    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();

    let mut buf = String::new();
    let mut buf_is_body = false;
    let mut buf_name: Option<String> = None;
    let mut depth: i32 = 0;

    macro_rules! flush {
        () => {
            if !buf.trim().is_empty() {
                let types = if buf_is_body { ChunkTypes::CONTENT } else { ChunkTypes::STRUCTURAL };
                let path = buf_name.clone().into_iter().collect();
                chunks.push(SplitChunk::new(buf.trim_end_matches('\n').to_string(), 1, path, types));
            }
            buf.clear();
            buf_is_body = false;
            buf_name = None;
        };
    }

    for line in &lines {
        let indent = line.len() - line.trim_start().len();
        let is_top_level_def = indent == 0 && DEFINITION_RE.is_match(line.trim_start());

        if is_top_level_def && depth == 0 {
            flush!();
            buf_is_body = true;
            buf_name = extract_name(line);
        }

        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
        depth = depth.max(0);

        buf.push_str(line);
        buf.push('\n');
    }
    flush!();

    if chunks.is_empty() {
        chunks.push(SplitChunk::new(text.trim_end_matches('\n').to_string(), 1, Vec::new(), ChunkTypes::CONTENT));
    }

    chunks
}

fn extract_name(line: &str) -> Option<String> {
    let caps = DEFINITION_RE.find(line.trim_start())?;
    line.trim_start()[caps.end() - 1..]
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_top_level_functions() {
        let code = "use std::io;\n\nfn one() {\n    let x = 1;\n}\n\nfn two() {\n    let y = 2;\n}\n";
        let chunks = split(code);
        assert!(chunks.iter().any(|c| c.metadata.section_path.0 == vec!["one".to_string()]));
        assert!(chunks.iter().any(|c| c.metadata.section_path.0 == vec!["two".to_string()]));
    }

    #[test]
    fn leading_material_is_scaffolding() {
        let code = "use std::io;\nuse std::fs;\n\nfn main() {}\n";
        let chunks = split(code);
        let header = &chunks[0];
        assert!(header.metadata.types.contains(ChunkTypes::STRUCTURAL));
        assert!(!header.metadata.types.contains(ChunkTypes::CONTENT));
    }

    #[test]
    fn nested_braces_do_not_split_function_body() {
        let code = "fn outer() {\n    if true {\n        do_thing();\n    }\n}\n";
        let chunks = split(code);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("do_thing"));
    }
}
