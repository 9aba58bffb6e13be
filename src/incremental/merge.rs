//! Combining surviving chunks with freshly parsed ones

use super::change::ShiftMap;
use super::config::IdMatchStrategy;
use super::scope::Invalidated;
use super::version::{lineage_key, Chunk, IdLineage, Span};
use crate::extract::ChunkDraft;
use std::collections::{BTreeMap, HashSet};

/// A newly parsed chunk in new-text coordinates, scored and hashed
#[derive(Debug, Clone, PartialEq)]
pub struct FreshChunk {
    pub draft: ChunkDraft,
    pub content_hash: String,
    pub confidence: f32,
}

impl FreshChunk {
    fn span(&self) -> Span {
        Span::new(self.draft.start_line, self.draft.end_line)
    }

    fn into_chunk(self, id: String) -> Chunk {
        Chunk {
            id,
            chunk_type: self.draft.chunk_type,
            name: self.draft.name,
            span: Span::new(self.draft.start_line, self.draft.end_line),
            content_hash: self.content_hash,
            confidence: self.confidence,
            metadata: self.draft.metadata,
        }
    }
}

/// Result of a merge
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Sorted, non-overlapping chunk list
    pub chunks: Vec<Chunk>,
    pub lineage: IdLineage,
    /// Ids carried over from invalidated chunks or revived from tombstones
    pub reused: Vec<String>,
    /// Ids allocated for chunks with no predecessor
    pub allocated: Vec<String>,
    /// Survivors displaced by an overlapping fresh chunk
    pub displaced: usize,
}

/// Reconciles survivors and fresh chunks, keeping ids stable
pub struct Merger<'a> {
    file_identity: &'a str,
    strategy: IdMatchStrategy,
    proximity_lines: usize,
}

impl<'a> Merger<'a> {
    pub fn new(file_identity: &'a str, strategy: IdMatchStrategy, proximity_lines: usize) -> Self {
        Self {
            file_identity,
            strategy,
            proximity_lines,
        }
    }

    /// Merge `survivors` (already shifted) with `fresh` chunks
    ///
    /// Fresh chunks are authoritative: any survivor overlapping one is
    /// dropped and becomes a matching candidate like the invalidated chunks.
    pub fn merge(
        &self,
        survivors: Vec<Chunk>,
        fresh: Vec<FreshChunk>,
        mut invalidated: Vec<Invalidated>,
        mut lineage: IdLineage,
        shifts: &ShiftMap,
    ) -> MergeOutcome {
        lineage.shift(shifts);

        let fresh = drop_residual_overlaps(fresh);

        let mut kept = Vec::with_capacity(survivors.len());
        let mut displaced = 0;
        for survivor in survivors {
            if fresh.iter().any(|f| f.span().overlaps(&survivor.span)) {
                tracing::warn!(
                    "Survivor {} at {} overlaps a reparsed chunk; dropping it",
                    survivor.id,
                    survivor.span
                );
                displaced += 1;
                invalidated.push(Invalidated {
                    mapped_line: survivor.span.start_line,
                    chunk: survivor,
                });
            } else {
                kept.push(survivor);
            }
        }

        let mut live: HashSet<String> = kept.iter().map(|c| c.id.clone()).collect();
        for chunk in kept.iter().chain(invalidated.iter().map(|i| &i.chunk)) {
            lineage.observe(chunk);
        }

        // Candidates per key, in order of appearance
        invalidated.sort_by_key(|i| i.mapped_line);
        let mut candidates: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, dead) in invalidated.iter().enumerate() {
            candidates.entry(dead.chunk.key()).or_default().push(index);
        }
        let mut claimed = vec![false; invalidated.len()];

        let mut reused = Vec::new();
        let mut allocated = Vec::new();
        let mut chunks = kept;

        for chunk in fresh {
            let draft = &chunk.draft;
            let key = lineage_key(draft.chunk_type, &draft.name);
            let pool = candidates.get(&key).map(Vec::as_slice).unwrap_or(&[]);

            let matched = match self.strategy {
                IdMatchStrategy::StrictNameType => pool.iter().copied().find(|&i| !claimed[i]),
                IdMatchStrategy::NameTypeProximity => pool
                    .iter()
                    .copied()
                    .filter(|&i| !claimed[i])
                    .min_by_key(|&i| invalidated[i].mapped_line.abs_diff(draft.start_line)),
            };

            let id = if let Some(index) = matched {
                claimed[index] = true;
                reused.push(invalidated[index].chunk.id.clone());
                invalidated[index].chunk.id.clone()
            } else {
                let revived = match self.strategy {
                    IdMatchStrategy::NameTypeProximity => lineage
                        .revive(draft.chunk_type, &draft.name, chunk.span(), self.proximity_lines)
                        .filter(|id| !live.contains(id)),
                    IdMatchStrategy::StrictNameType => None,
                };
                match revived {
                    Some(id) => {
                        reused.push(id.clone());
                        id
                    }
                    None => {
                        let id = lineage.allocate(
                            self.file_identity,
                            draft.chunk_type,
                            &draft.name,
                            &live,
                        );
                        allocated.push(id.clone());
                        id
                    }
                }
            };

            live.insert(id.clone());
            chunks.push(chunk.into_chunk(id));
        }

        for (index, dead) in invalidated.iter().enumerate() {
            if !claimed[index] && !live.contains(&dead.chunk.id) {
                lineage.bury(&dead.chunk, dead.mapped_line);
            }
        }

        chunks.sort_by_key(|c| c.span.start_line);

        MergeOutcome {
            chunks,
            lineage,
            reused,
            allocated,
            displaced,
        }
    }
}

/// Sort fresh chunks and drop any overlapping an earlier one
fn drop_residual_overlaps(mut fresh: Vec<FreshChunk>) -> Vec<FreshChunk> {
    fresh.sort_by(|a, b| {
        a.draft
            .start_line
            .cmp(&b.draft.start_line)
            .then(b.draft.end_line.cmp(&a.draft.end_line))
    });

    let mut kept: Vec<FreshChunk> = Vec::with_capacity(fresh.len());
    for chunk in fresh {
        if let Some(last) = kept.last() {
            if last.span().overlaps(&chunk.span()) {
                tracing::warn!("Dropping overlapping fresh chunk {}", chunk.draft.name);
                continue;
            }
        }
        kept.push(chunk);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{content_hash, ChunkType, Metadata};
    use crate::incremental::change::LineChange;

    fn chunk(id: &str, name: &str, start: usize, end: usize) -> Chunk {
        Chunk {
            id: id.to_string(),
            chunk_type: ChunkType::Function,
            name: name.to_string(),
            span: Span::new(start, end),
            content_hash: content_hash(id),
            confidence: 0.9,
            metadata: Metadata::new(),
        }
    }

    fn fresh(name: &str, start: usize, end: usize) -> FreshChunk {
        FreshChunk {
            draft: ChunkDraft::new(ChunkType::Function, name, start, end),
            content_hash: content_hash(name),
            confidence: 0.9,
        }
    }

    fn dead(id: &str, name: &str, line: usize) -> Invalidated {
        Invalidated {
            chunk: chunk(id, name, line, line + 2),
            mapped_line: line,
        }
    }

    #[test]
    fn test_regenerated_chunk_keeps_id() {
        let merger = Merger::new("t.py", IdMatchStrategy::StrictNameType, 0);
        let outcome = merger.merge(
            vec![chunk("t.py::function::a", "a", 1, 5)],
            vec![fresh("b", 7, 12)],
            vec![dead("t.py::function::b", "b", 7)],
            IdLineage::default(),
            &ShiftMap::default(),
        );
        assert_eq!(outcome.chunks.len(), 2);
        assert_eq!(outcome.chunks[1].id, "t.py::function::b");
        assert_eq!(outcome.reused, vec!["t.py::function::b".to_string()]);
        assert!(outcome.allocated.is_empty());
    }

    #[test]
    fn test_rename_allocates_and_buries() {
        let merger = Merger::new("t.py", IdMatchStrategy::StrictNameType, 0);
        let outcome = merger.merge(
            Vec::new(),
            vec![fresh("renamed", 1, 3)],
            vec![dead("t.py::function::b", "b", 1)],
            IdLineage::default(),
            &ShiftMap::default(),
        );
        assert_eq!(outcome.chunks[0].id, "t.py::function::renamed");
        assert_eq!(outcome.lineage.tombstones()[0].id, "t.py::function::b");
    }

    #[test]
    fn test_strict_pairs_in_order_proximity_by_distance() {
        let invalidated = vec![dead("f", "f", 1), dead("f#1", "f", 20)];
        let fresh_chunks = vec![fresh("f", 21, 23)];

        let strict = Merger::new("t.py", IdMatchStrategy::StrictNameType, 3).merge(
            Vec::new(),
            fresh_chunks.clone(),
            invalidated.clone(),
            IdLineage::default(),
            &ShiftMap::default(),
        );
        assert_eq!(strict.chunks[0].id, "f");

        let proximity = Merger::new("t.py", IdMatchStrategy::NameTypeProximity, 3).merge(
            Vec::new(),
            fresh_chunks,
            invalidated,
            IdLineage::default(),
            &ShiftMap::default(),
        );
        assert_eq!(proximity.chunks[0].id, "f#1");
    }

    #[test]
    fn test_tombstone_revival_depends_on_strategy() {
        let mut lineage = IdLineage::default();
        lineage.bury(&chunk("t.py::function::a", "a", 4, 8), 4);
        // Two lines inserted above the tombstone
        let shifts = ShiftMap::new(&[LineChange::new(0..0, 0..2)]);

        let proximity = Merger::new("t.py", IdMatchStrategy::NameTypeProximity, 3).merge(
            Vec::new(),
            vec![fresh("a", 7, 9)],
            Vec::new(),
            lineage.clone(),
            &shifts,
        );
        assert_eq!(proximity.chunks[0].id, "t.py::function::a");

        let strict = Merger::new("t.py", IdMatchStrategy::StrictNameType, 3).merge(
            Vec::new(),
            vec![fresh("a", 7, 9)],
            Vec::new(),
            lineage,
            &shifts,
        );
        assert_eq!(strict.chunks[0].id, "t.py::function::a#1");
    }

    #[test]
    fn test_fresh_chunk_displaces_overlapping_survivor() {
        let merger = Merger::new("t.py", IdMatchStrategy::NameTypeProximity, 3);
        let outcome = merger.merge(
            vec![chunk("t.py::function::a", "a", 1, 5), chunk("t.py::function::c", "c", 9, 10)],
            vec![fresh("a", 1, 6)],
            Vec::new(),
            IdLineage::default(),
            &ShiftMap::default(),
        );
        assert_eq!(outcome.displaced, 1);
        let ids: Vec<_> = outcome.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["t.py::function::a", "t.py::function::c"]);
        assert_eq!(outcome.chunks[0].span, Span::new(1, 6));
    }
}
