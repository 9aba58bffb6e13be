//! Confidence scoring for chunk drafts
//!
//! Scoring is a pure function of a draft and the structural signals
//! observed around it. The orchestrator gathers the signals from the full
//! file text so a draft scores the same whether it came from a window or
//! from a full parse.

use super::{ChunkDraft, Language};

/// Structural evidence about a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuralSignals {
    /// The draft has a non-empty name
    pub named: bool,
    /// Brackets inside the span are balanced (always true for indentation languages)
    pub balanced: bool,
    /// The parser did not recover from errors inside the construct
    pub clean: bool,
    /// A comment or docstring is attached to the construct
    pub documented: bool,
    /// Number of lines in the span
    pub line_count: usize,
}

impl StructuralSignals {
    /// Gather signals for `draft`, whose span is given in the coordinates of `lines`
    pub fn inspect(draft: &ChunkDraft, language: Language, lines: &[&str]) -> Self {
        let start = draft.start_line.saturating_sub(1).min(lines.len());
        let end = draft.end_line.min(lines.len()).max(start);
        let body = &lines[start..end];

        let balanced = !language.uses_braces() || brackets_balanced(body);

        let preceding_comment = start
            .checked_sub(1)
            .and_then(|i| lines.get(i))
            .is_some_and(|line| is_comment(line.trim_start(), language));
        let docstring = draft
            .metadata
            .get("has_docstring")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Self {
            named: !draft.name.trim().is_empty(),
            balanced,
            clean: !draft.has_errors,
            documented: preceding_comment || docstring,
            line_count: end - start,
        }
    }
}

/// Everything the scorer looks at
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub draft: &'a ChunkDraft,
    pub signals: StructuralSignals,
}

/// Score a draft; the result is always within [0, 1]
pub fn score(input: &ScoreInput<'_>) -> f32 {
    let signals = &input.signals;
    let mut confidence = input.draft.raw_confidence;

    if !signals.clean {
        confidence *= 0.6;
    }
    if !signals.balanced {
        confidence -= 0.15;
    }
    if !signals.named {
        confidence -= 0.1;
    }
    if signals.documented {
        confidence += 0.05;
    }

    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

fn is_comment(line: &str, language: Language) -> bool {
    line.starts_with(language.comment_prefix())
        || (language.uses_braces() && (line.starts_with("/*") || line.starts_with('*')))
}

/// Bracket counts match, ignoring string and comment content only roughly
fn brackets_balanced(body: &[&str]) -> bool {
    let mut depth: i64 = 0;
    for line in body {
        let code = line.split("//").next().unwrap_or("");
        for c in code.chars() {
            match c {
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => depth -= 1,
                _ => {}
            }
        }
    }
    depth == 0
}
