//! Versioned chunk tables and id lineage

use super::change::ShiftMap;
use super::lines::LineIndex;
use crate::error::{ChunkError, Result};
use crate::extract::{ChunkType, Language, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Most recently dropped ids remembered per file
pub const MAX_TOMBSTONES: usize = 64;

/// 1-indexed inclusive line span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    /// Number of lines covered
    pub fn len(&self) -> usize {
        (self.end_line + 1).saturating_sub(self.start_line)
    }

    pub fn is_empty(&self) -> bool {
        self.end_line < self.start_line
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start_line <= other.end_line && other.start_line <= self.end_line
    }

    /// Lines between `line` and the nearest line of the span; 0 inside it
    pub fn distance_to(&self, line: usize) -> usize {
        if line < self.start_line {
            self.start_line - line
        } else {
            line.saturating_sub(self.end_line)
        }
    }

    /// 0-indexed half-open line range
    pub fn to_range(&self) -> std::ops::Range<usize> {
        self.start_line.saturating_sub(1)..self.end_line
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_line, self.end_line)
    }
}

/// A semantic fragment of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: String,
    #[serde(flatten)]
    pub span: Span,
    pub content_hash: String,
    pub confidence: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Lineage key shared by every chunk with this type and name
    pub fn key(&self) -> String {
        lineage_key(self.chunk_type, &self.name)
    }
}

/// A dropped id, kept so it is never reallocated and may be revived nearby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub name: String,
    /// Last known start line, shifted along with later edits
    pub line: usize,
}

/// Id allocation state carried from version to version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdLineage {
    /// Next ordinal per `type::name` key
    #[serde(default)]
    ordinals: BTreeMap<String, u32>,
    #[serde(default)]
    tombstones: Vec<Tombstone>,
}

impl IdLineage {
    /// Allocate a never-used id for a chunk
    pub fn allocate(
        &mut self,
        file_identity: &str,
        chunk_type: ChunkType,
        name: &str,
        live: &HashSet<String>,
    ) -> String {
        let ordinal = self.ordinals.entry(lineage_key(chunk_type, name)).or_insert(0);
        loop {
            let id = format_id(file_identity, chunk_type, name, *ordinal);
            *ordinal += 1;
            if !live.contains(&id) {
                return id;
            }
        }
    }

    /// Record that a live id was observed, so fresh ids never collide with it
    pub fn observe(&mut self, chunk: &Chunk) {
        let Some(ordinal) = parse_ordinal(&chunk.id) else {
            return;
        };
        let next = self.ordinals.entry(chunk.key()).or_insert(0);
        *next = (*next).max(ordinal + 1);
    }

    /// Remember a dropped chunk
    pub fn bury(&mut self, chunk: &Chunk, line: usize) {
        self.observe(chunk);
        self.tombstones.retain(|t| t.id != chunk.id);
        self.tombstones.push(Tombstone {
            id: chunk.id.clone(),
            chunk_type: chunk.chunk_type,
            name: chunk.name.clone(),
            line,
        });
        if self.tombstones.len() > MAX_TOMBSTONES {
            let excess = self.tombstones.len() - MAX_TOMBSTONES;
            self.tombstones.drain(..excess);
        }
    }

    /// Take back the nearest matching tombstone lying within `distance`
    /// lines of `span`
    pub fn revive(
        &mut self,
        chunk_type: ChunkType,
        name: &str,
        span: Span,
        distance: usize,
    ) -> Option<String> {
        let (index, _) = self
            .tombstones
            .iter()
            .enumerate()
            .filter(|(_, t)| t.chunk_type == chunk_type && t.name == name)
            .map(|(i, t)| (i, span.distance_to(t.line)))
            .filter(|(_, d)| *d <= distance)
            .min_by_key(|(i, d)| (*d, std::cmp::Reverse(*i)))?;
        Some(self.tombstones.remove(index).id)
    }

    /// Move tombstones along with an edit
    pub fn shift(&mut self, shifts: &ShiftMap) {
        for tombstone in &mut self.tombstones {
            tombstone.line = shifts.map_line(tombstone.line.saturating_sub(1)) + 1;
        }
    }

    pub fn tombstones(&self) -> &[Tombstone] {
        &self.tombstones
    }
}

/// Everything known about one version of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    pub file_identity: String,
    pub language: Language,
    pub text_hash: String,
    pub line_count: usize,
    pub chunks: Vec<Chunk>,
    /// Produced by a parse that had to recover from syntax errors
    #[serde(default)]
    pub recovered: bool,
    #[serde(default)]
    pub lineage: IdLineage,
    /// Line spans of the top-level syntax nodes, in source order
    #[serde(default)]
    pub outline: Vec<Span>,
}

impl FileVersion {
    pub fn ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.id.as_str()).collect()
    }

    /// Check ordering, bounds and id uniqueness; with `text`, also check
    /// every content hash against it
    pub fn validate(&self, text: Option<&str>) -> Result<()> {
        let violation = |detail: String| ChunkError::invariant(&self.file_identity, detail);

        let mut ids = HashSet::new();
        let mut previous: Option<&Chunk> = None;
        for chunk in &self.chunks {
            let span = chunk.span;
            if span.start_line == 0 || span.end_line < span.start_line || span.end_line > self.line_count {
                return Err(violation(format!(
                    "chunk {} span {} outside 1..={}",
                    chunk.id, span, self.line_count
                )));
            }
            if let Some(prev) = previous {
                if prev.span.end_line >= span.start_line {
                    return Err(violation(format!(
                        "chunks {} ({}) and {} ({}) overlap or are out of order",
                        prev.id, prev.span, chunk.id, span
                    )));
                }
            }
            if !ids.insert(chunk.id.as_str()) {
                return Err(violation(format!("duplicate id {}", chunk.id)));
            }
            previous = Some(chunk);
        }

        let mut previous_start = 0;
        for span in &self.outline {
            if span.start_line < previous_start.max(1)
                || span.end_line < span.start_line
                || span.end_line > self.line_count
            {
                return Err(violation(format!(
                    "outline node {} out of order or outside 1..={}",
                    span, self.line_count
                )));
            }
            previous_start = span.start_line;
        }

        if let Some(text) = text {
            let index = LineIndex::new(text);
            if index.len() != self.line_count {
                return Err(violation(format!(
                    "line count {} does not match text ({} lines)",
                    self.line_count,
                    index.len()
                )));
            }
            for chunk in &self.chunks {
                let hash = index.span_hash(chunk.span.start_line, chunk.span.end_line);
                if hash.as_deref() != Some(chunk.content_hash.as_str()) {
                    return Err(violation(format!("stale content hash for {}", chunk.id)));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

pub(crate) fn lineage_key(chunk_type: ChunkType, name: &str) -> String {
    format!("{}::{}", chunk_type, display_name(name))
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "anonymous"
    } else {
        name
    }
}

/// `file::type::name`, with `#n` appended after the first ordinal
pub fn format_id(file_identity: &str, chunk_type: ChunkType, name: &str, ordinal: u32) -> String {
    let base = format!("{}::{}::{}", file_identity, chunk_type, display_name(name));
    if ordinal == 0 {
        base
    } else {
        format!("{}#{}", base, ordinal)
    }
}

fn parse_ordinal(id: &str) -> Option<u32> {
    match id.rsplit_once('#') {
        Some((_, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) && !suffix.is_empty() => {
            suffix.parse().ok()
        }
        _ => Some(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::content_hash;
    use crate::incremental::change::LineChange;

    fn chunk(id: &str, name: &str, start: usize, end: usize, text: &str) -> Chunk {
        let index = LineIndex::new(text);
        Chunk {
            id: id.to_string(),
            chunk_type: ChunkType::Function,
            name: name.to_string(),
            span: Span::new(start, end),
            content_hash: index.span_hash(start, end).unwrap_or_default(),
            confidence: 0.9,
            metadata: Metadata::new(),
        }
    }

    fn version(chunks: Vec<Chunk>, line_count: usize) -> FileVersion {
        FileVersion {
            file_identity: "a.py".to_string(),
            language: Language::Python,
            text_hash: content_hash(""),
            line_count,
            chunks,
            recovered: false,
            lineage: IdLineage::default(),
            outline: Vec::new(),
        }
    }

    #[test]
    fn test_format_id() {
        assert_eq!(format_id("a.py", ChunkType::Function, "f", 0), "a.py::function::f");
        assert_eq!(format_id("a.py", ChunkType::Class, "", 2), "a.py::class::anonymous#2");
    }

    #[test]
    fn test_allocate_skips_live_and_never_reuses() {
        let mut lineage = IdLineage::default();
        let mut live = HashSet::new();
        let first = lineage.allocate("a.py", ChunkType::Function, "f", &live);
        assert_eq!(first, "a.py::function::f");
        live.insert(first);
        assert_eq!(
            lineage.allocate("a.py", ChunkType::Function, "f", &live),
            "a.py::function::f#1"
        );
        assert_eq!(
            lineage.allocate("a.py", ChunkType::Function, "f", &HashSet::new()),
            "a.py::function::f#2"
        );
    }

    #[test]
    fn test_observe_raises_high_water() {
        let mut lineage = IdLineage::default();
        lineage.observe(&chunk("a.py::function::f#4", "f", 1, 1, "x\n"));
        assert_eq!(
            lineage.allocate("a.py", ChunkType::Function, "f", &HashSet::new()),
            "a.py::function::f#5"
        );
    }

    #[test]
    fn test_tombstones_revive_and_shift() {
        let mut lineage = IdLineage::default();
        lineage.bury(&chunk("a.py::function::f", "f", 10, 12, ""), 10);
        lineage.shift(&ShiftMap::new(&[LineChange::new(0..0, 0..3)]));
        assert_eq!(lineage.tombstones()[0].line, 13);

        assert_eq!(lineage.revive(ChunkType::Function, "f", Span::new(20, 22), 3), None);
        assert_eq!(
            lineage.revive(ChunkType::Function, "f", Span::new(5, 10), 3),
            Some("a.py::function::f".to_string())
        );
        assert!(lineage.tombstones().is_empty());
    }

    #[test]
    fn test_tombstones_are_bounded() {
        let mut lineage = IdLineage::default();
        for i in 0..(MAX_TOMBSTONES + 10) {
            let id = format!("a.py::function::f#{}", i);
            lineage.bury(&chunk(&id, "f", 1, 1, ""), 1);
        }
        assert_eq!(lineage.tombstones().len(), MAX_TOMBSTONES);
        assert_eq!(lineage.tombstones()[0].id, "a.py::function::f#10");
    }

    #[test]
    fn test_validate() {
        let text = "def a():\n    pass\n\ndef b():\n    pass\n";
        let good = version(
            vec![chunk("a", "a", 1, 2, text), chunk("b", "b", 4, 5, text)],
            5,
        );
        assert!(good.validate(Some(text)).is_ok());

        let overlapping = version(
            vec![chunk("a", "a", 1, 4, text), chunk("b", "b", 4, 5, text)],
            5,
        );
        assert!(matches!(
            overlapping.validate(None),
            Err(ChunkError::InvariantViolation { .. })
        ));

        let out_of_bounds = version(vec![chunk("a", "a", 1, 9, text)], 5);
        assert!(out_of_bounds.validate(None).is_err());

        let mut stale = good.clone();
        stale.chunks[1].content_hash = content_hash("something else");
        assert!(stale.validate(None).is_ok());
        assert!(stale.validate(Some(text)).is_err());

        let mut outlined = good.clone();
        outlined.outline = vec![Span::new(1, 2), Span::new(4, 5)];
        assert!(outlined.validate(Some(text)).is_ok());
        outlined.outline.reverse();
        assert!(outlined.validate(None).is_err());
        outlined.outline = vec![Span::new(4, 6)];
        assert!(outlined.validate(None).is_err());
    }

    #[test]
    fn test_json_layout() {
        let text = "def a():\n    pass\n";
        let version = version(vec![chunk("a.py::function::a", "a", 1, 2, text)], 2);
        let json = version.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &value["chunks"][0];
        assert_eq!(first["type"], "function");
        assert_eq!(first["start_line"], 1);
        assert_eq!(first["end_line"], 2);
        assert_eq!(FileVersion::from_json(&json).unwrap(), version);
    }
}
