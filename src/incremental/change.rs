//! Line-granular change detection between two versions of a file

use crate::error::{ChunkError, Result};
use similar::{Algorithm, DiffTag, TextDiff};
use std::ops::Range;
use std::time::Duration;

/// One changed region: lines `old` of the previous text became lines `new`
///
/// Ranges are 0-indexed and half-open. A pure insertion has an empty
/// `old` range, a pure deletion an empty `new` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineChange {
    pub old: Range<usize>,
    pub new: Range<usize>,
}

impl LineChange {
    pub fn new(old: Range<usize>, new: Range<usize>) -> Self {
        Self { old, new }
    }

    /// Line delta applied to everything after this change
    pub fn delta(&self) -> isize {
        self.new.len() as isize - self.old.len() as isize
    }

    pub fn is_insertion(&self) -> bool {
        self.old.is_empty()
    }

    pub fn is_deletion(&self) -> bool {
        self.new.is_empty()
    }
}

/// Ordered, disjoint changes between two texts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub ranges: Vec<LineChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Total number of old and new lines touched
    pub fn changed_lines(&self) -> usize {
        self.ranges.iter().map(|c| c.old.len().max(c.new.len())).sum()
    }

    /// Cumulative line shifts implied by the changes
    pub fn shift_map(&self) -> ShiftMap {
        ShiftMap::new(&self.ranges)
    }
}

/// Translates line numbers of the previous text into the new text
#[derive(Debug, Clone, Default)]
pub struct ShiftMap {
    changes: Vec<LineChange>,
}

impl ShiftMap {
    pub fn new(changes: &[LineChange]) -> Self {
        Self {
            changes: changes.to_vec(),
        }
    }

    /// Sum of deltas of every change ending at or before the 0-indexed old line
    pub fn delta_at(&self, old_line: usize) -> isize {
        self.changes
            .iter()
            .take_while(|c| c.old.end <= old_line)
            .map(LineChange::delta)
            .sum()
    }

    /// Shift a 1-indexed line lying outside every changed range
    pub fn shift(&self, line: usize) -> usize {
        apply_delta(line, self.delta_at(line.saturating_sub(1)))
    }

    /// Best-effort position of a 0-indexed old line in the new text
    ///
    /// Lines inside a changed range land at the corresponding offset of
    /// the replacement, clamped to it.
    pub fn map_line(&self, old_line: usize) -> usize {
        let mut delta = 0isize;
        for change in &self.changes {
            if change.old.end <= old_line {
                delta += change.delta();
                continue;
            }
            if change.old.start <= old_line {
                let offset = old_line - change.old.start;
                let last = change.new.end.saturating_sub(1).max(change.new.start);
                return (change.new.start + offset).min(last);
            }
            break;
        }
        apply_delta(old_line, delta)
    }
}

fn apply_delta(position: usize, delta: isize) -> usize {
    (position as isize).saturating_add(delta).max(0) as usize
}

/// Computes shift-aware line diffs
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    timeout: Duration,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl ChangeDetector {
    /// Create a detector; diffs running longer than `timeout` settle for a
    /// coarser (still correct) result
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Diff two texts line by line
    pub fn detect(&self, old_text: &str, new_text: &str) -> Result<ChangeSet> {
        // Fast path: identical texts need no processing
        if old_text == new_text {
            return Ok(ChangeSet::default());
        }

        if old_text.contains('\0') || new_text.contains('\0') {
            return Err(ChunkError::DiffInconclusive(
                "text contains NUL bytes".to_string(),
            ));
        }
        if old_text.contains("\r\n") != new_text.contains("\r\n") {
            return Err(ChunkError::DiffInconclusive(
                "line endings changed".to_string(),
            ));
        }

        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .timeout(self.timeout)
            .diff_lines(old_text, new_text);

        let mut ranges: Vec<LineChange> = Vec::new();
        for op in diff.ops() {
            let (tag, old, new) = op.as_tag_tuple();
            if tag == DiffTag::Equal {
                continue;
            }
            // Delete followed by insert at the same spot is one replacement
            if let Some(last) = ranges.last_mut() {
                if last.old.end == old.start && last.new.end == new.start {
                    last.old.end = old.end;
                    last.new.end = new.end;
                    continue;
                }
            }
            ranges.push(LineChange::new(old, new));
        }

        Ok(ChangeSet { ranges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detect(old: &str, new: &str) -> ChangeSet {
        ChangeDetector::default().detect(old, new).unwrap()
    }

    #[test]
    fn test_identical_texts_have_no_changes() {
        assert!(detect("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn test_in_place_edit() {
        let changes = detect("a\nb\nc\n", "a\nX\nc\n");
        assert_eq!(changes.ranges, vec![LineChange::new(1..2, 1..2)]);
        assert_eq!(changes.ranges[0].delta(), 0);
    }

    #[test]
    fn test_pure_insertion_and_deletion() {
        let inserted = detect("a\nb\n", "a\nx\ny\nb\n");
        assert_eq!(inserted.ranges, vec![LineChange::new(1..1, 1..3)]);
        assert!(inserted.ranges[0].is_insertion());

        let deleted = detect("a\nx\ny\nb\n", "a\nb\n");
        assert_eq!(deleted.ranges, vec![LineChange::new(1..3, 1..1)]);
        assert!(deleted.ranges[0].is_deletion());
    }

    #[test]
    fn test_diff_is_shift_aware() {
        let old = "one\ntwo\nthree\nfour\nfive\n";
        let new = "zero\none\ntwo\nthree\nfour\nfive\n";
        let changes = detect(old, new);
        assert_eq!(changes.ranges, vec![LineChange::new(0..0, 0..1)]);
    }

    #[test]
    fn test_binary_and_line_ending_changes_are_inconclusive() {
        let detector = ChangeDetector::default();
        assert!(matches!(
            detector.detect("a\n", "a\0\n"),
            Err(ChunkError::DiffInconclusive(_))
        ));
        assert!(matches!(
            detector.detect("a\nb\n", "a\r\nb\r\n"),
            Err(ChunkError::DiffInconclusive(_))
        ));
    }

    #[test]
    fn test_shift_map() {
        let changes = ChangeSet {
            ranges: vec![LineChange::new(2..2, 2..5), LineChange::new(10..12, 13..13)],
        };
        let shifts = changes.shift_map();
        assert_eq!(shifts.shift(1), 1);
        assert_eq!(shifts.shift(3), 6);
        assert_eq!(shifts.shift(13), 14);
        assert_eq!(shifts.map_line(10), 13);
        assert_eq!(shifts.map_line(12), 13);
    }
}
