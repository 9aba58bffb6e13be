//! Incremental parsing engine
//!
//! This module keeps a chunk table per file consistent with edits:
//! - `ChangeDetector` diffs the cached text against the new text
//! - `ScopeResolver` decides which chunks survive and what to reparse
//! - `Merger` combines survivors with fresh chunks, keeping ids stable
//! - `IncrementalParser` drives the pipeline and owns the cache

pub mod change;
pub mod config;
pub mod lines;
pub mod merge;
pub mod scope;
pub mod version;

pub use change::{ChangeDetector, ChangeSet, LineChange, ShiftMap};
pub use config::{IdMatchStrategy, ParserConfig, UseCase};
pub use lines::LineIndex;
pub use merge::{FreshChunk, MergeOutcome, Merger};
pub use scope::{EscalationReason, Invalidated, Resolution, Scope, ScopeResolver};
use scope::carry_outline;
pub use version::{format_id, Chunk, FileVersion, IdLineage, Span, Tombstone, MAX_TOMBSTONES};

use crate::error::{ChunkError, Result};
use crate::extract::{
    content_hash, score, ChunkDraft, Language, LanguageProcessor, ParseScope, ProcessorRegistry,
    ScoreInput, StructuralSignals,
};
use crate::storage::{ChunkStore, Snapshot};
use rayon::prelude::*;
use serde::Serialize;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Cooperative cancellation shared between a caller and a running parse
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn check_cancelled(cancel: Option<&CancelFlag>, file: &str) -> Result<()> {
    if cancel.is_some_and(CancelFlag::is_cancelled) {
        debug!("Parse of {} cancelled", file);
        return Err(ChunkError::Cancelled(file.to_string()));
    }
    Ok(())
}

/// How a version was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// The text matched the cache; the cached version was returned
    Unchanged,
    /// Only reparse windows were parsed
    Incremental,
    /// The whole file was parsed
    Full,
}

/// What a parse did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseReport {
    pub mode: ParseMode,
    pub escalation: Option<String>,
    /// 0-indexed half-open line ranges that were parsed
    pub windows: Vec<Range<usize>>,
    /// Chunks carried over without reparsing
    pub survivors: usize,
    /// Chunks produced by this parse
    pub reparsed: usize,
    pub reused_ids: Vec<String>,
    pub allocated_ids: Vec<String>,
}

/// A published version and how it came about
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub version: Arc<FileVersion>,
    pub report: ParseReport,
}

/// One file for batch reparsing
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub file_identity: String,
    pub text: String,
    pub language: Language,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Full,
    Auto,
}

/// Orchestrates change detection, scope resolution, parsing and merging
pub struct IncrementalParser {
    config: ParserConfig,
    registry: ProcessorRegistry,
    store: Arc<ChunkStore>,
    detector: ChangeDetector,
}

impl IncrementalParser {
    /// Create a parser with the built-in processors and a private cache
    pub fn new(config: ParserConfig) -> Result<Self> {
        let store = Arc::new(ChunkStore::with_capacity(config.cache_capacity));
        Self::with_parts(config, ProcessorRegistry::with_defaults(), store)
    }

    /// Create a parser from explicit collaborators
    pub fn with_parts(
        config: ParserConfig,
        registry: ProcessorRegistry,
        store: Arc<ChunkStore>,
    ) -> Result<Self> {
        config.validate()?;
        let detector = ChangeDetector::new(config.diff_timeout());
        Ok(Self {
            config,
            registry,
            store,
            detector,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Parse the whole file and publish the result
    ///
    /// Ids are still reconciled against a cached version of the same language.
    pub fn parse(&self, file_identity: &str, text: &str, language: Language) -> Result<Arc<FileVersion>> {
        self.run(file_identity, text, language, Request::Full, None)
            .map(|outcome| outcome.version)
    }

    pub fn parse_cancellable(
        &self,
        file_identity: &str,
        text: &str,
        language: Language,
        cancel: &CancelFlag,
    ) -> Result<Arc<FileVersion>> {
        self.run(file_identity, text, language, Request::Full, Some(cancel))
            .map(|outcome| outcome.version)
    }

    /// Bring the cached version up to date with `text`
    pub fn reparse(&self, file_identity: &str, text: &str, language: Language) -> Result<Arc<FileVersion>> {
        self.reparse_with_report(file_identity, text, language)
            .map(|outcome| outcome.version)
    }

    pub fn reparse_with_report(
        &self,
        file_identity: &str,
        text: &str,
        language: Language,
    ) -> Result<ParseOutcome> {
        self.run(file_identity, text, language, Request::Auto, None)
    }

    /// Reparse, giving up with `Cancelled` once `cancel` is raised; the
    /// cached version is left untouched in that case
    pub fn reparse_cancellable(
        &self,
        file_identity: &str,
        text: &str,
        language: Language,
        cancel: &CancelFlag,
    ) -> Result<ParseOutcome> {
        self.run(file_identity, text, language, Request::Auto, Some(cancel))
    }

    /// Reparse independent files in parallel
    pub fn reparse_many(&self, inputs: &[SourceInput]) -> Vec<Result<Arc<FileVersion>>> {
        inputs
            .par_iter()
            .map(|input| self.reparse(&input.file_identity, &input.text, input.language))
            .collect()
    }

    /// Drop the cached version; the next reparse is a full parse
    pub fn invalidate(&self, file_identity: &str) -> bool {
        self.store.invalidate(file_identity)
    }

    /// Cached version of a file
    pub fn get(&self, file_identity: &str) -> Option<Arc<FileVersion>> {
        self.store.get(file_identity)
    }

    /// Seed the cache with a version loaded from elsewhere
    pub fn hydrate(&self, version: FileVersion, text: &str) -> Result<()> {
        if version.text_hash != content_hash(text) {
            return Err(ChunkError::invariant(
                &version.file_identity,
                "text hash does not match the supplied text",
            ));
        }
        version.validate(Some(text))?;
        let key = version.file_identity.clone();
        self.store.insert(&key, Snapshot::new(version, text));
        Ok(())
    }

    fn run(
        &self,
        file: &str,
        text: &str,
        language: Language,
        request: Request,
        cancel: Option<&CancelFlag>,
    ) -> Result<ParseOutcome> {
        let processor = Arc::clone(self.registry.get(language)?);

        self.store.write(file, |guard| {
            let prior = guard.current();
            let outcome = self.build(file, text, language, request, prior, processor.as_ref(), cancel)?;

            if outcome.report.mode != ParseMode::Unchanged {
                check_cancelled(cancel, file)?;
                guard.publish(Snapshot {
                    version: Arc::clone(&outcome.version),
                    text: Arc::from(text),
                });
                debug!(
                    "Published {} ({:?}, {} chunks)",
                    file,
                    outcome.report.mode,
                    outcome.version.chunks.len()
                );
            }
            Ok(outcome)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        file: &str,
        text: &str,
        language: Language,
        request: Request,
        prior: Option<Snapshot>,
        processor: &dyn LanguageProcessor,
        cancel: Option<&CancelFlag>,
    ) -> Result<ParseOutcome> {
        check_cancelled(cancel, file)?;
        let index = LineIndex::new(text);
        let full = FullParse {
            file,
            text,
            index: &index,
            language,
            processor,
            cancel,
        };

        let prior = match prior {
            None => return self.full_parse(&full, None, ShiftMap::default(), EscalationReason::NoPrior),
            Some(snapshot) if snapshot.version.language != language => {
                return self.full_parse(&full, None, ShiftMap::default(), EscalationReason::LanguageChanged)
            }
            Some(snapshot) => snapshot,
        };

        if request == Request::Full {
            let shifts = self.best_effort_shifts(&prior.text, text);
            return self.full_parse(&full, Some(&prior.version), shifts, EscalationReason::Forced);
        }

        if *prior.text == *text {
            debug!("{} unchanged", file);
            return Ok(ParseOutcome {
                report: ParseReport {
                    mode: ParseMode::Unchanged,
                    escalation: None,
                    windows: Vec::new(),
                    survivors: prior.version.chunks.len(),
                    reparsed: 0,
                    reused_ids: Vec::new(),
                    allocated_ids: Vec::new(),
                },
                version: prior.version,
            });
        }

        if prior.version.recovered {
            let shifts = self.best_effort_shifts(&prior.text, text);
            return self.full_parse(&full, Some(&prior.version), shifts, EscalationReason::RecoveredPrior);
        }

        let changes = match self.detector.detect(&prior.text, text) {
            Ok(changes) => changes,
            Err(e) if e.is_recoverable() => {
                warn!("{}: {}; parsing in full", file, e);
                return self.full_parse(
                    &full,
                    Some(&prior.version),
                    ShiftMap::default(),
                    EscalationReason::DiffInconclusive(e.to_string()),
                );
            }
            Err(e) => return Err(e),
        };
        check_cancelled(cancel, file)?;

        let resolution =
            ScopeResolver::new(processor, &self.config).resolve(&prior.version, &changes, &index);

        let windows = match resolution.scope {
            Scope::Full(reason) => {
                debug!("{}: escalating to a full parse ({})", file, reason);
                return self.full_parse(&full, Some(&prior.version), resolution.shifts, reason);
            }
            Scope::Windows(windows) => windows,
        };

        let mut drafts = Vec::new();
        let mut parsed_outline = Vec::new();
        for window in &windows {
            check_cancelled(cancel, file)?;
            let window_text = index.slice(window.start, window.end);
            match processor.process(window_text, ParseScope::Window) {
                Ok(extraction) => {
                    drafts.extend(extraction.drafts.into_iter().map(|d| d.offset(window.start)));
                    parsed_outline.extend(outline_spans(extraction.outline, window.start));
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "Window {}..{} of {} failed ({}); falling back to a full parse",
                        window.start, window.end, file, e
                    );
                    return self.full_parse(
                        &full,
                        Some(&prior.version),
                        resolution.shifts,
                        EscalationReason::WindowFailed(e.to_string()),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let fresh = fresh_chunks(drafts, language, &index);
        let reparsed = fresh.len();
        let survivors = resolution.survivors.len();
        check_cancelled(cancel, file)?;

        let outline = carry_outline(
            &prior.version.outline,
            &changes,
            &resolution.shifts,
            &windows,
            parsed_outline,
        );
        let merged = self.merger(file).merge(
            resolution.survivors,
            fresh,
            resolution.invalidated,
            prior.version.lineage.clone(),
            &resolution.shifts,
        );

        debug!(
            "{}: {} windows, {} survivors, {} reparsed",
            file,
            windows.len(),
            survivors - merged.displaced,
            reparsed
        );

        let report = ParseReport {
            mode: ParseMode::Incremental,
            escalation: None,
            windows,
            survivors: survivors - merged.displaced,
            reparsed,
            reused_ids: merged.reused,
            allocated_ids: merged.allocated,
        };
        let version = assemble(
            file,
            text,
            &index,
            language,
            Assembly {
                chunks: merged.chunks,
                outline,
                recovered: false,
                lineage: merged.lineage,
            },
        )?;

        Ok(ParseOutcome {
            version: Arc::new(version),
            report,
        })
    }

    /// Parse the whole text, reconciling ids against `prior` if given
    fn full_parse(
        &self,
        job: &FullParse<'_>,
        prior: Option<&FileVersion>,
        shifts: ShiftMap,
        reason: EscalationReason,
    ) -> Result<ParseOutcome> {
        debug!("Full parse of {}: {}", job.file, reason);
        check_cancelled(job.cancel, job.file)?;

        let extraction = job
            .processor
            .process(job.text, ParseScope::File)
            .map_err(|e| match e {
                ChunkError::Cancelled(_) => e,
                other => ChunkError::ParseFailed {
                    file: job.file.to_string(),
                    reason: other.to_string(),
                },
            })?;
        check_cancelled(job.cancel, job.file)?;

        if extraction.recovered {
            debug!("{} parsed with error recovery", job.file);
        }

        let fresh = fresh_chunks(extraction.drafts, job.language, job.index);
        let reparsed = fresh.len();

        let (invalidated, lineage) = match prior {
            Some(prior) => (
                prior
                    .chunks
                    .iter()
                    .map(|chunk| Invalidated::from_prior(chunk, &shifts))
                    .collect(),
                prior.lineage.clone(),
            ),
            None => (Vec::new(), IdLineage::default()),
        };

        let merged = self
            .merger(job.file)
            .merge(Vec::new(), fresh, invalidated, lineage, &shifts);

        let version = assemble(
            job.file,
            job.text,
            job.index,
            job.language,
            Assembly {
                chunks: merged.chunks,
                outline: outline_spans(extraction.outline, 0),
                recovered: extraction.recovered,
                lineage: merged.lineage,
            },
        )?;

        Ok(ParseOutcome {
            version: Arc::new(version),
            report: ParseReport {
                mode: ParseMode::Full,
                escalation: Some(reason.to_string()),
                windows: vec![0..job.index.len()],
                survivors: 0,
                reparsed,
                reused_ids: merged.reused,
                allocated_ids: merged.allocated,
            },
        })
    }

    fn merger<'a>(&self, file: &'a str) -> Merger<'a> {
        Merger::new(
            file,
            self.config.id_match_strategy,
            self.config.proximity_lines,
        )
    }

    /// Line shifts for carrying tombstones through a forced full parse
    fn best_effort_shifts(&self, old_text: &str, new_text: &str) -> ShiftMap {
        self.detector
            .detect(old_text, new_text)
            .map(|changes| changes.shift_map())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for IncrementalParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalParser")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("store", &self.store)
            .finish()
    }
}

/// Inputs shared by every full-parse path
struct FullParse<'a> {
    file: &'a str,
    text: &'a str,
    index: &'a LineIndex<'a>,
    language: Language,
    processor: &'a dyn LanguageProcessor,
    cancel: Option<&'a CancelFlag>,
}

/// Hash and score drafts given in new-text coordinates
fn fresh_chunks(drafts: Vec<ChunkDraft>, language: Language, index: &LineIndex) -> Vec<FreshChunk> {
    let lines = index.lines();
    drafts
        .into_iter()
        .filter_map(|draft| {
            let Some(text) = index.span_text(draft.start_line, draft.end_line) else {
                warn!(
                    "Dropping draft {} with span {}-{} outside the file",
                    draft.name, draft.start_line, draft.end_line
                );
                return None;
            };
            let signals = StructuralSignals::inspect(&draft, language, &lines);
            let confidence = score(&ScoreInput {
                draft: &draft,
                signals,
            });
            Some(FreshChunk {
                content_hash: content_hash(text),
                confidence,
                draft,
            })
        })
        .collect()
}

/// Processor outline nodes moved down by `offset` lines
fn outline_spans(nodes: Vec<(usize, usize)>, offset: usize) -> Vec<Span> {
    nodes
        .into_iter()
        .map(|(start, end)| Span::new(start + offset, end + offset))
        .collect()
}

/// Parse results that make up a version
struct Assembly {
    chunks: Vec<Chunk>,
    outline: Vec<Span>,
    recovered: bool,
    lineage: IdLineage,
}

/// Build and validate a version before it can be published
fn assemble(
    file: &str,
    text: &str,
    index: &LineIndex,
    language: Language,
    parts: Assembly,
) -> Result<FileVersion> {
    let version = FileVersion {
        file_identity: file.to_string(),
        language,
        text_hash: content_hash(text),
        line_count: index.len(),
        chunks: parts.chunks,
        recovered: parts.recovered,
        lineage: parts.lineage,
        outline: parts.outline,
    };

    // Hash checks re-read every chunk, so only debug builds pay for them
    let check_text = cfg!(debug_assertions).then_some(text);
    if let Err(e) = version.validate(check_text) {
        error!("{}", e);
        return Err(e);
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extraction;

    const TWO_FUNCTIONS: &str = "def a():\n    return 1\n\ndef b():\n    return 2\n";

    fn parser() -> IncrementalParser {
        IncrementalParser::new(ParserConfig::default()).unwrap()
    }

    #[test]
    fn test_first_reparse_is_full() {
        let parser = parser();
        let outcome = parser
            .reparse_with_report("m.py", TWO_FUNCTIONS, Language::Python)
            .unwrap();
        assert_eq!(outcome.report.mode, ParseMode::Full);
        assert_eq!(outcome.report.escalation.as_deref(), Some("no cached version"));
        assert_eq!(outcome.version.ids(), vec!["m.py::function::a", "m.py::function::b"]);
        assert!(parser.get("m.py").is_some());
    }

    #[test]
    fn test_unchanged_text_returns_cached_version() {
        let parser = parser();
        let first = parser.reparse("m.py", TWO_FUNCTIONS, Language::Python).unwrap();
        let outcome = parser
            .reparse_with_report("m.py", TWO_FUNCTIONS, Language::Python)
            .unwrap();
        assert_eq!(outcome.report.mode, ParseMode::Unchanged);
        assert!(Arc::ptr_eq(&first, &outcome.version));
    }

    #[test]
    fn test_language_change_resets_lineage() {
        let parser = parser();
        parser.reparse("m", TWO_FUNCTIONS, Language::Python).unwrap();
        let outcome = parser
            .reparse_with_report("m", "fn a() {}\n", Language::Rust)
            .unwrap();
        assert_eq!(outcome.report.escalation.as_deref(), Some("language changed"));
        assert_eq!(outcome.version.language, Language::Rust);
        assert!(outcome.version.lineage.tombstones().is_empty());
    }

    #[test]
    fn test_cancelled_parse_publishes_nothing() {
        let parser = parser();
        let first = parser.reparse("m.py", TWO_FUNCTIONS, Language::Python).unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let edited = TWO_FUNCTIONS.replace("return 2", "return 3");
        let result = parser.reparse_cancellable("m.py", &edited, Language::Python, &cancel);
        assert!(matches!(result, Err(ChunkError::Cancelled(_))));
        assert!(Arc::ptr_eq(&first, &parser.get("m.py").unwrap()));
    }

    struct Rejecting;

    impl LanguageProcessor for Rejecting {
        fn language(&self) -> Language {
            Language::Python
        }

        fn process(&self, _text: &str, _scope: ParseScope) -> Result<Extraction> {
            Err(ChunkError::malformed(Language::Python, "always"))
        }
    }

    #[test]
    fn test_full_parse_failure_surfaces_parse_failed() {
        let mut registry = ProcessorRegistry::empty();
        registry.register(Arc::new(Rejecting));
        let parser = IncrementalParser::with_parts(
            ParserConfig::default(),
            registry,
            Arc::new(ChunkStore::new()),
        )
        .unwrap();

        let result = parser.reparse("m.py", TWO_FUNCTIONS, Language::Python);
        assert!(matches!(result, Err(ChunkError::ParseFailed { .. })));
        assert!(parser.get("m.py").is_none());
        assert!(parser.store().is_empty());
    }

    #[test]
    fn test_unsupported_language() {
        let parser = IncrementalParser::with_parts(
            ParserConfig::default(),
            ProcessorRegistry::empty(),
            Arc::new(ChunkStore::new()),
        )
        .unwrap();
        assert!(matches!(
            parser.reparse("m.py", "", Language::Python),
            Err(ChunkError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ParserConfig::default();
        config.escalation_fraction = -0.5;
        assert!(IncrementalParser::new(config).is_err());
    }

    #[test]
    fn test_hydrate_checks_text() {
        let parser = parser();
        let version = (*parser.parse("m.py", TWO_FUNCTIONS, Language::Python).unwrap()).clone();
        parser.invalidate("m.py");

        assert!(parser.hydrate(version.clone(), "other text\n").is_err());
        parser.hydrate(version, TWO_FUNCTIONS).unwrap();
        let outcome = parser
            .reparse_with_report("m.py", TWO_FUNCTIONS, Language::Python)
            .unwrap();
        assert_eq!(outcome.report.mode, ParseMode::Unchanged);
    }
}
