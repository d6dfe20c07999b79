//! Neighborhood assembly (spec.md §4.5): given a page's full chunk list and
//! one hit, expands it with parent/sibling/child context. Implemented as a
//! pure function over already-loaded chunks (same approach as the splitter's
//! `greedy_optimize`) so the hierarchy-walking logic is independently
//! testable without a database.

use docindex_shared::types::Chunk;

#[derive(Debug, Clone, Copy)]
pub struct AssemblyLimits {
    pub max_chunk_distance: u32,
    pub max_parent_chain_depth: u32,
    pub child_limit: u32,
    pub preceding_siblings_limit: u32,
    pub subsequent_siblings_limit: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Neighborhood {
    /// Closest ancestor first.
    pub parents: Vec<Chunk>,
    /// Reading order (ascending `sort_order`).
    pub preceding_siblings: Vec<Chunk>,
    pub subsequent_siblings: Vec<Chunk>,
    pub children: Vec<Chunk>,
}

/// Expands `hit_id` using the full, `sort_order`-ordered chunk list of its
/// page. Returns an empty neighborhood if `hit_id` isn't found in
/// `all_chunks` (the caller loaded the wrong page, or the chunk was deleted
/// concurrently).
pub fn assemble(all_chunks: &[Chunk], hit_id: i64, limits: &AssemblyLimits) -> Neighborhood {
    let Some(hit) = all_chunks.iter().find(|c| c.id == hit_id) else {
        return Neighborhood::default();
    };
    let hit_path = hit.metadata.section_path.clone();
    let hit_order = hit.sort_order;

    let mut parents: Vec<&Chunk> = all_chunks
        .iter()
        .filter(|c| c.sort_order < hit_order && c.metadata.section_path.is_prefix_of(&hit_path))
        .collect();
    parents.sort_by(|a, b| b.metadata.section_path.0.len().cmp(&a.metadata.section_path.0.len()));
    parents.truncate(limits.max_parent_chain_depth as usize);

    let mut preceding: Vec<&Chunk> = all_chunks
        .iter()
        .filter(|c| c.id != hit.id && c.metadata.section_path == hit_path && c.sort_order < hit_order)
        .collect();
    preceding.sort_by_key(|c| std::cmp::Reverse(c.sort_order));
    preceding.truncate(limits.preceding_siblings_limit as usize);
    preceding.reverse();

    let mut subsequent: Vec<&Chunk> = all_chunks
        .iter()
        .filter(|c| c.metadata.section_path == hit_path && c.sort_order > hit_order)
        .collect();
    subsequent.sort_by_key(|c| c.sort_order);
    subsequent.truncate(limits.subsequent_siblings_limit as usize);

    let mut children: Vec<&Chunk> = all_chunks
        .iter()
        .filter(|c| {
            c.metadata.section_path.0.len() == hit_path.0.len() + 1
                && hit_path.is_prefix_of(&c.metadata.section_path)
                && c.sort_order > hit_order
                && c.sort_order - hit_order <= limits.max_chunk_distance
        })
        .collect();
    children.sort_by_key(|c| c.sort_order);
    children.truncate(limits.child_limit as usize);

    Neighborhood {
        parents: parents.into_iter().cloned().collect(),
        preceding_siblings: preceding.into_iter().cloned().collect(),
        subsequent_siblings: subsequent.into_iter().cloned().collect(),
        children: children.into_iter().cloned().collect(),
    }
}
