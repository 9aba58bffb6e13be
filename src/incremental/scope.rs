//! Mapping changed lines onto prior chunks and reparse windows

use super::change::{ChangeSet, LineChange, ShiftMap};
use super::config::ParserConfig;
use super::lines::LineIndex;
use super::version::{Chunk, FileVersion, Span};
use crate::extract::LanguageProcessor;
use std::ops::Range;

/// Why a reparse covered the whole file
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationReason {
    /// Nothing was cached for the file
    NoPrior,
    /// The cached version was parsed as another language
    LanguageChanged,
    /// Incremental reparsing is disabled by configuration
    AlwaysFull,
    /// Too large a share of the file's chunks was invalidated
    TooManyInvalidated { invalidated: usize, total: usize },
    /// The line diff could not be trusted
    DiffInconclusive(String),
    /// The cached version came from error recovery
    RecoveredPrior,
    /// The cached version carries no syntax outline to cut windows by
    NoOutline,
    /// A window could not be parsed on its own
    WindowFailed(String),
    /// The caller asked for a full parse
    Forced,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::NoPrior => write!(f, "no cached version"),
            EscalationReason::LanguageChanged => write!(f, "language changed"),
            EscalationReason::AlwaysFull => write!(f, "incremental reparsing disabled"),
            EscalationReason::TooManyInvalidated { invalidated, total } => {
                write!(f, "{} of {} chunks invalidated", invalidated, total)
            }
            EscalationReason::DiffInconclusive(reason) => write!(f, "diff inconclusive: {}", reason),
            EscalationReason::RecoveredPrior => write!(f, "cached version had syntax errors"),
            EscalationReason::NoOutline => write!(f, "cached version has no syntax outline"),
            EscalationReason::WindowFailed(reason) => write!(f, "window parse failed: {}", reason),
            EscalationReason::Forced => write!(f, "full parse requested"),
        }
    }
}

/// A prior chunk whose text was touched by the edit
#[derive(Debug, Clone, PartialEq)]
pub struct Invalidated {
    pub chunk: Chunk,
    /// Approximate 1-indexed start line in the new text
    pub mapped_line: usize,
}

impl Invalidated {
    /// Invalidate a chunk given in old coordinates
    pub fn from_prior(chunk: &Chunk, shifts: &ShiftMap) -> Self {
        Self {
            chunk: chunk.clone(),
            mapped_line: shifts.map_line(chunk.span.start_line.saturating_sub(1)) + 1,
        }
    }

    /// Approximate 0-indexed line range in the new text
    fn mapped_range(&self, shifts: &ShiftMap, line_count: usize) -> Range<usize> {
        let start = shifts.map_line(self.chunk.span.start_line.saturating_sub(1));
        let end = shifts.map_line(self.chunk.span.end_line.saturating_sub(1)) + 1;
        start.min(line_count)..end.max(start).min(line_count)
    }
}

/// What needs reparsing
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Parse the entire file
    Full(EscalationReason),
    /// Parse these disjoint 0-indexed half-open line ranges of the new text
    Windows(Vec<Range<usize>>),
}

/// Outcome of scope resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    pub scope: Scope,
    /// Untouched prior chunks, already shifted into new coordinates
    pub survivors: Vec<Chunk>,
    pub invalidated: Vec<Invalidated>,
    pub shifts: ShiftMap,
}

impl Resolution {
    /// Invalidate everything
    pub fn full(prior: &[Chunk], shifts: ShiftMap, reason: EscalationReason) -> Self {
        let invalidated = prior
            .iter()
            .map(|chunk| Invalidated::from_prior(chunk, &shifts))
            .collect();
        Self {
            scope: Scope::Full(reason),
            survivors: Vec::new(),
            invalidated,
            shifts,
        }
    }
}

/// Decides which prior chunks survive an edit and which lines to reparse
pub struct ScopeResolver<'a> {
    processor: &'a dyn LanguageProcessor,
    config: &'a ParserConfig,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(processor: &'a dyn LanguageProcessor, config: &'a ParserConfig) -> Self {
        Self { processor, config }
    }

    /// Resolve `changes` against the prior version
    pub fn resolve(&self, version: &FileVersion, changes: &ChangeSet, text: &LineIndex) -> Resolution {
        let prior = version.chunks.as_slice();
        let shifts = changes.shift_map();
        if self.config.always_full() {
            return Resolution::full(prior, shifts, EscalationReason::AlwaysFull);
        }
        if version.outline.is_empty() && version.line_count > 0 {
            return Resolution::full(prior, shifts, EscalationReason::NoOutline);
        }

        let layout = Layout::new(text, self.processor, version, changes);
        let line_count = layout.len();

        let mut survivors = Vec::with_capacity(prior.len());
        let mut invalidated = Vec::new();
        let mut windows = Vec::new();

        for chunk in prior {
            let range = chunk.span.to_range();
            if changes.ranges.iter().any(|c| touches(c, &range)) {
                let dead = Invalidated::from_prior(chunk, &shifts);
                windows.push(dead.mapped_range(&shifts, line_count));
                invalidated.push(dead);
            } else {
                let mut survivor = chunk.clone();
                survivor.span = Span::new(
                    shifts.shift(chunk.span.start_line),
                    shifts.shift(chunk.span.end_line),
                );
                survivors.push(survivor);
            }
        }

        // Neighbouring lines can change a construct's extent or its score
        windows.extend(changes.ranges.iter().map(|c| {
            c.new.start.saturating_sub(1).min(line_count)..(c.new.end + 1).min(line_count)
        }));

        loop {
            windows = coalesce(windows.into_iter().map(|w| layout.snap(w)).collect());

            let mut grew = false;
            let mut kept = Vec::with_capacity(survivors.len());
            for survivor in survivors {
                let range = survivor.span.to_range();
                match windows
                    .iter_mut()
                    .find(|w| w.start < range.end && range.start < w.end)
                {
                    Some(window) => {
                        window.start = window.start.min(range.start);
                        window.end = window.end.max(range.end);
                        invalidated.push(Invalidated {
                            mapped_line: survivor.span.start_line,
                            chunk: survivor,
                        });
                        grew = true;
                    }
                    None => kept.push(survivor),
                }
            }
            survivors = kept;

            if !grew {
                break;
            }
        }

        let total = prior.len();
        if total > 0 && invalidated.len() as f32 > self.config.escalation_fraction * total as f32 {
            let reason = EscalationReason::TooManyInvalidated {
                invalidated: invalidated.len(),
                total,
            };
            return Resolution::full(prior, shifts, reason);
        }

        tracing::debug!(
            "Resolved {} changes ({} lines) into {} windows ({} survivors, {} invalidated)",
            changes.len(),
            changes.changed_lines(),
            windows.len(),
            survivors.len(),
            invalidated.len()
        );

        Resolution {
            scope: Scope::Windows(windows),
            survivors,
            invalidated,
            shifts,
        }
    }
}

/// Whether a change touches the 0-indexed half-open range of a chunk
///
/// Insertions count only when they land strictly inside the chunk.
fn touches(change: &LineChange, range: &Range<usize>) -> bool {
    if change.is_insertion() {
        let at = change.old.start;
        range.start < at && at < range.end
    } else {
        change.old.start < range.end && range.start < change.old.end
    }
}

/// Sort windows, merge overlapping or adjacent ones, drop empty ones
fn coalesce(mut windows: Vec<Range<usize>>) -> Vec<Range<usize>> {
    windows.retain(|w| w.start < w.end);
    windows.sort_by_key(|w| (w.start, w.end));

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => last.end = last.end.max(window.end),
            _ => merged.push(window),
        }
    }
    merged
}

/// Where reparse windows may be cut in the new text
///
/// Text left outside the windows is reused as is, so every cut must fall
/// between two top-level nodes of the prior version: the unchanged line
/// next to the cut maps back to a prior line, and the prior outline says
/// whether a node runs across that point.
struct Layout<'a> {
    lines: Vec<&'a str>,
    processor: &'a dyn LanguageProcessor,
    /// Prior line of each unchanged new line
    origin: Vec<Option<usize>>,
    /// Prior cuts inside a top-level node; cut `c` sits before prior line `c`
    straddled: Vec<bool>,
}

impl<'a> Layout<'a> {
    fn new(
        text: &LineIndex<'a>,
        processor: &'a dyn LanguageProcessor,
        prior: &FileVersion,
        changes: &ChangeSet,
    ) -> Self {
        let lines = text.lines();

        let mut origin = vec![None; lines.len()];
        let (mut old, mut new) = (0, 0);
        for change in &changes.ranges {
            while new < change.new.start.min(lines.len()) {
                origin[new] = Some(old);
                old += 1;
                new += 1;
            }
            old = change.old.end;
            new = change.new.end;
        }
        while new < lines.len() {
            origin[new] = Some(old);
            old += 1;
            new += 1;
        }

        let mut straddled = vec![false; prior.line_count + 1];
        for node in &prior.outline {
            for cut in node.start_line..node.end_line {
                if let Some(flag) = straddled.get_mut(cut) {
                    *flag = true;
                }
            }
        }

        Self {
            lines,
            processor,
            origin,
            straddled,
        }
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn is_blank(&self, line: usize) -> bool {
        self.lines[line].trim().is_empty()
    }

    fn next_nonblank(&self, from: usize) -> Option<usize> {
        (from..self.len()).find(|&i| !self.is_blank(i))
    }

    fn prev_nonblank(&self, before: usize) -> Option<usize> {
        (0..before.min(self.len())).rev().find(|&i| !self.is_blank(i))
    }

    fn straddles(&self, cut: usize) -> bool {
        self.straddled.get(cut).copied().unwrap_or(false)
    }

    /// Whether the first non-blank line from `line` on may begin a
    /// top-level construct
    fn opens_cleanly(&self, line: usize) -> bool {
        match self.next_nonblank(line) {
            None => true,
            Some(first) => {
                let previous = self.prev_nonblank(first).map(|p| self.lines[p]);
                self.processor.is_window_boundary(previous, self.lines[first])
            }
        }
    }

    /// A window may start at `line` if the reused text before it ends
    /// between prior nodes
    fn can_start(&self, line: usize) -> bool {
        if line == 0 {
            return true;
        }
        let clean = self.origin[line - 1].is_some_and(|old| !self.straddles(old + 1));
        clean && self.opens_cleanly(line)
    }

    /// A window may end before `line` if the reused text from there on
    /// starts between prior nodes
    fn can_end(&self, line: usize) -> bool {
        if line >= self.len() {
            return true;
        }
        let clean = self.origin[line].is_some_and(|old| !self.straddles(old));
        clean && self.opens_cleanly(line)
    }

    /// Grow a window until both of its ends are safe cuts
    fn snap(&self, window: Range<usize>) -> Range<usize> {
        let len = self.len();

        let mut start = window.start.min(len);
        while !self.can_start(start) {
            start -= 1;
        }

        let mut end = window.end.max(start).min(len);
        while !self.can_end(end) {
            end += 1;
        }

        start..end
    }
}

/// Outline of the new text: prior nodes left outside every window, shifted,
/// plus the nodes found by the window parses
pub(crate) fn carry_outline(
    prior: &[Span],
    changes: &ChangeSet,
    shifts: &ShiftMap,
    windows: &[Range<usize>],
    parsed: Vec<Span>,
) -> Vec<Span> {
    let mut outline: Vec<Span> = prior
        .iter()
        .filter(|node| {
            let range = node.to_range();
            !changes.ranges.iter().any(|c| touches(c, &range))
        })
        .map(|node| Span::new(shifts.shift(node.start_line), shifts.shift(node.end_line)))
        .filter(|node| {
            let range = node.to_range();
            !windows.iter().any(|w| w.start < range.end && range.start < w.end)
        })
        .chain(parsed)
        .collect();
    outline.sort_by_key(|node| (node.start_line, node.end_line));
    outline.dedup();
    outline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{content_hash, ChunkType, Language, Metadata, PythonProcessor};
    use crate::incremental::change::ChangeDetector;
    use crate::incremental::version::IdLineage;

    const OLD: &str = "def a():\n    x = 1\n    y = 2\n    z = 3\n    return x\n\ndef b():\n    p = 1\n    q = 2\n    r = 3\n    s = 4\n    return p\n";

    fn version(text: &str, chunks: &[(&str, usize, usize)], outline: &[(usize, usize)]) -> FileVersion {
        let index = LineIndex::new(text);
        FileVersion {
            file_identity: "t.py".to_string(),
            language: Language::Python,
            text_hash: content_hash(text),
            line_count: index.len(),
            chunks: chunks
                .iter()
                .map(|(name, start, end)| Chunk {
                    id: format!("t.py::function::{}", name),
                    chunk_type: ChunkType::Function,
                    name: name.to_string(),
                    span: Span::new(*start, *end),
                    content_hash: index.span_hash(*start, *end).unwrap_or_default(),
                    confidence: 0.95,
                    metadata: Metadata::new(),
                })
                .collect(),
            recovered: false,
            lineage: IdLineage::default(),
            outline: outline.iter().map(|(start, end)| Span::new(*start, *end)).collect(),
        }
    }

    fn prior() -> FileVersion {
        version(OLD, &[("a", 1, 5), ("b", 7, 12)], &[(1, 5), (7, 12)])
    }

    fn resolve_against(prior: &FileVersion, old: &str, new: &str, fraction: f32) -> Resolution {
        let processor = PythonProcessor::new();
        let config = ParserConfig {
            escalation_fraction: fraction,
            ..ParserConfig::default()
        };
        let changes = ChangeDetector::default().detect(old, new).unwrap();
        ScopeResolver::new(&processor, &config).resolve(prior, &changes, &LineIndex::new(new))
    }

    fn resolve(new: &str, fraction: f32) -> Resolution {
        resolve_against(&prior(), OLD, new, fraction)
    }

    fn names(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_edit_inside_b_invalidates_only_b() {
        let new = OLD.replace("    q = 2\n", "    q = 20\n");
        let resolution = resolve(&new, 0.5);
        assert_eq!(resolution.scope, Scope::Windows(vec![6..12]));
        assert_eq!(names(&resolution.survivors), vec!["a"]);
        assert_eq!(resolution.invalidated[0].chunk.name, "b");
    }

    #[test]
    fn test_insertion_above_b_shifts_b() {
        let new = OLD.replace("\ndef b", "\n# note\n\ndef b");
        let resolution = resolve(&new, 1.0);
        let Scope::Windows(windows) = &resolution.scope else {
            panic!("expected windows");
        };
        // The comment attaches to b, so b is reparsed; a is not
        assert!(windows.iter().all(|w| w.start >= 5));
        assert_eq!(resolution.survivors.len(), 1);
        assert_eq!(resolution.survivors[0].span, Span::new(1, 5));
    }

    #[test]
    fn test_survivor_shift_past_insertion() {
        let new = format!("import os\n\n\n{}", OLD);
        let resolution = resolve(&new, 1.0);
        let b = resolution
            .survivors
            .iter()
            .find(|c| c.name == "b")
            .expect("b survives");
        assert_eq!(b.span, Span::new(10, 15));
        assert_eq!(b.content_hash, prior().chunks[1].content_hash);
    }

    #[test]
    fn test_escalates_when_most_chunks_invalidated() {
        let new = OLD.replace("x = 1", "x = 10").replace("p = 1", "p = 10");
        let resolution = resolve(&new, 0.5);
        assert!(matches!(
            resolution.scope,
            Scope::Full(EscalationReason::TooManyInvalidated { invalidated: 2, total: 2 })
        ));
        assert!(resolution.survivors.is_empty());
        assert_eq!(resolution.invalidated.len(), 2);

        let always = resolve(&new, 0.0);
        assert_eq!(always.scope, Scope::Full(EscalationReason::AlwaysFull));
    }

    #[test]
    fn test_missing_outline_escalates() {
        let mut bare = prior();
        bare.outline.clear();
        let new = OLD.replace("    q = 2\n", "    q = 20\n");
        let resolution = resolve_against(&bare, OLD, &new, 1.0);
        assert_eq!(resolution.scope, Scope::Full(EscalationReason::NoOutline));
    }

    #[test]
    fn test_appended_text_is_windowed() {
        let new = format!("{}\ndef c():\n    pass\n", OLD);
        let resolution = resolve(&new, 1.0);
        let Scope::Windows(windows) = &resolution.scope else {
            panic!("expected windows");
        };
        assert_eq!(windows.last().map(|w| w.end), Some(15));
    }

    #[test]
    fn test_window_never_starts_inside_a_string() {
        let old = "X = \"\"\"\ndef fake():\n    pass\n\"\"\"\n\ndef real():\n    return 1\n";
        let prior = version(old, &[("real", 6, 7)], &[(1, 4), (6, 7)]);
        let new = old.replace("    pass", "    return");

        let resolution = resolve_against(&prior, old, &new, 1.0);
        assert_eq!(resolution.scope, Scope::Windows(vec![0..4]));
        assert_eq!(names(&resolution.survivors), vec!["real"]);
    }

    #[test]
    fn test_column_zero_comment_in_class_reparses_whole_class() {
        let old = "class C:\n    def m(self):\n        pass\n\n    def n(self):\n        pass\n\ndef f():\n    pass\n";
        let prior = version(
            old,
            &[("C", 1, 1), ("m", 2, 3), ("n", 5, 6), ("f", 8, 9)],
            &[(1, 6), (8, 9)],
        );
        let new = old.replace("    def n", "# c\n    def n");

        let resolution = resolve_against(&prior, old, &new, 1.0);
        assert_eq!(resolution.scope, Scope::Windows(vec![0..7]));
        assert_eq!(names(&resolution.survivors), vec!["f"]);
    }

    #[test]
    fn test_carry_outline() {
        let new = format!("import os\n\n{}", OLD.replace("    q = 2\n", "    q = 20\n"));
        let changes = ChangeDetector::default().detect(OLD, &new).unwrap();
        let shifts = changes.shift_map();
        let outline = carry_outline(
            &prior().outline,
            &changes,
            &shifts,
            &[8..14],
            vec![Span::new(1, 1), Span::new(9, 14)],
        );
        assert_eq!(
            outline,
            vec![Span::new(1, 1), Span::new(3, 7), Span::new(9, 14)]
        );
    }

    #[test]
    fn test_touches() {
        let insertion = LineChange::new(5..5, 5..8);
        assert!(!touches(&insertion, &(0..5)));
        assert!(!touches(&insertion, &(5..10)));
        assert!(touches(&insertion, &(3..7)));
        assert!(touches(&LineChange::new(4..6, 4..4), &(5..10)));
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(coalesce(vec![5..8, 0..2, 2..3, 7..9, 4..4]), vec![0..3, 5..9]);
    }
}
