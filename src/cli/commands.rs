//! Command implementations

use super::OutputFormat;
use crate::extract::Language;
use crate::incremental::{FileVersion, IncrementalParser, ParseMode, SourceInput};
use crate::repo::{ChunkerConfig, SourceFile, Workspace, STATE_DIR};
use crate::storage::Database;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of an index run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub files: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: Vec<String>,
    pub chunks: usize,
}

fn open_database(workspace: &Workspace) -> Result<Database> {
    if !workspace.is_initialized() {
        anyhow::bail!("code-chunker not initialized. Run 'code-chunker init' first.");
    }
    Database::open(workspace.database_path())
}

/// Build a parser whose cache is seeded from the stored snapshots
fn hydrated_parser(workspace: &Workspace, db: &Database) -> Result<IncrementalParser> {
    let parser = IncrementalParser::new(workspace.config().parser_config()?)?;
    for stored in db.load_all_snapshots()? {
        let identity = stored.version.file_identity.clone();
        if let Err(e) = parser.hydrate(stored.version, &stored.text) {
            warn!("Discarding stored version of {}: {}", identity, e);
        }
    }
    Ok(parser)
}

/// Initialize code-chunker in a workspace
pub fn init(path: &Path, force: bool) -> Result<()> {
    let workspace = Workspace::open(path)?;

    if workspace.is_initialized() && !force {
        anyhow::bail!("code-chunker already initialized. Use --force to re-initialize.");
    }

    let state_dir = workspace.init_state_dir()?;

    let db_path = workspace.database_path();
    if force && db_path.exists() {
        std::fs::remove_file(&db_path)
            .with_context(|| format!("Failed to remove {:?}", db_path))?;
    }
    let _db = Database::open(&db_path)?;

    // Keep an existing config; only write one if missing
    if !state_dir.join("config.toml").exists() {
        workspace.config().save(workspace.root())?;
    }

    println!("✓ Initialized code-chunker in {:?}", workspace.root());
    println!("  Database: {:?}", db_path);
    println!("  Config: {:?}", state_dir.join("config.toml"));

    Ok(())
}

/// Parse one file in full and print its chunks
///
/// When the workspace is initialized the stored version seeds id
/// reconciliation and the new version is saved.
pub fn parse(path: &Path, file: &Path, language: Option<Language>, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open(path)?;
    let source = workspace.resolve(file, language)?;
    let text = workspace.read_source(&source)?;

    let db = if workspace.is_initialized() {
        Some(Database::open(workspace.database_path())?)
    } else {
        None
    };

    let parser = IncrementalParser::new(workspace.config().parser_config()?)?;
    if let Some(db) = &db {
        if let Some(stored) = db.load_snapshot(&source.identity)? {
            if let Err(e) = parser.hydrate(stored.version, &stored.text) {
                warn!("Discarding stored version of {}: {}", source.identity, e);
            }
        }
    }

    let version = parser
        .parse(&source.identity, &text, source.language)
        .with_context(|| format!("Failed to parse {}", source.identity))?;

    if let Some(db) = &db {
        db.save_snapshot(&version, &text)?;
    }

    print_version(&version, format)
}

/// Chunk every source file in the workspace and persist the results
pub fn index(path: &Path, full: bool) -> Result<IndexSummary> {
    let workspace = Workspace::open(path)?;
    let db = open_database(&workspace)?;
    let parser = hydrated_parser(&workspace, &db)?;

    let files = workspace.source_files()?;
    info!("Indexing {} files in {:?}", files.len(), workspace.root());

    let mut summary = IndexSummary {
        files: files.len(),
        ..IndexSummary::default()
    };

    let mut inputs = Vec::with_capacity(files.len());
    for file in &files {
        match workspace.read_source(file) {
            Ok(text) => inputs.push(SourceInput {
                file_identity: file.identity.clone(),
                text,
                language: file.language,
            }),
            Err(e) => {
                warn!("{:#}", e);
                summary.failed.push(file.identity.clone());
            }
        }
    }

    let previous: HashMap<&str, String> = inputs
        .iter()
        .filter_map(|input| {
            let version = parser.get(&input.file_identity)?;
            Some((input.file_identity.as_str(), version.text_hash.clone()))
        })
        .collect();

    let results: Vec<crate::Result<Arc<FileVersion>>> = if full {
        inputs
            .par_iter()
            .map(|input| parser.parse(&input.file_identity, &input.text, input.language))
            .collect()
    } else {
        parser.reparse_many(&inputs)
    };

    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(version) => {
                summary.chunks += version.chunks.len();
                let stale = previous.get(input.file_identity.as_str()) != Some(&version.text_hash);
                if full || stale {
                    db.save_snapshot(&version, &input.text)?;
                    summary.updated += 1;
                } else {
                    summary.unchanged += 1;
                }
            }
            Err(e) => {
                warn!("Failed to chunk {}: {}", input.file_identity, e);
                summary.failed.push(input.file_identity.clone());
            }
        }
    }

    let present: BTreeSet<&str> = files.iter().map(|f| f.identity.as_str()).collect();
    for identity in db.list_files()? {
        if !present.contains(identity.as_str()) {
            debug!("Dropping stored version of removed file {}", identity);
            db.delete_snapshot(&identity)?;
            summary.removed += 1;
        }
    }

    db.set_last_indexed(summary.files)?;
    info!(
        "Indexed {} files ({} updated, {} unchanged, {} removed, {} failed)",
        summary.files,
        summary.updated,
        summary.unchanged,
        summary.removed,
        summary.failed.len()
    );

    Ok(summary)
}

/// Print the stored chunks of a file
pub fn show(path: &Path, file: &Path, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open(path)?;
    let db = open_database(&workspace)?;
    let identity = workspace.relative_identity(file)?;

    let stored = db
        .load_snapshot(&identity)?
        .ok_or_else(|| anyhow::anyhow!("No stored version for {}. Run 'code-chunker index' first.", identity))?;

    print_version(&stored.version, format)
}

/// Drop stored versions
pub fn invalidate(path: &Path, file: Option<&Path>, all: bool) -> Result<usize> {
    let workspace = Workspace::open(path)?;
    let db = open_database(&workspace)?;

    let identities = match (file, all) {
        (_, true) => db.list_files()?,
        (Some(file), false) => vec![workspace.relative_identity(file)?],
        (None, false) => anyhow::bail!("Specify a file or --all"),
    };

    let mut removed = 0;
    for identity in &identities {
        if db.delete_snapshot(identity)? {
            removed += 1;
        } else {
            debug!("No stored version for {}", identity);
        }
    }

    println!("✓ Invalidated {} file(s)", removed);
    Ok(removed)
}

/// Show index statistics
pub fn status(path: &Path, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open(path)?;
    let db = open_database(&workspace)?;
    let stats = db.get_stats()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("code-chunker Status");
            println!("===================\n");
            println!("Workspace: {:?}", workspace.root());
            println!("Files: {}", stats.files);
            println!("Chunks: {}", stats.chunks);
            println!("Recovered files: {}", stats.recovered_files);
            println!(
                "Last indexed: {}",
                stats.last_indexed.as_deref().unwrap_or("never")
            );
        }
    }

    Ok(())
}

/// Show or reset configuration
///
/// With no flag the configuration is shown; `--reset` alone stays quiet.
pub fn config(path: &Path, show: bool, reset: bool, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open(path)?;
    let mut config = workspace.config().clone();

    if reset {
        config = ChunkerConfig::default();
        config.save(workspace.root())?;
        println!("✓ Configuration reset to defaults");
    }

    if show || !reset {
        print_config(&config, format)?;
    }
    Ok(())
}

fn print_config(config: &ChunkerConfig, format: OutputFormat) -> Result<()> {
    let parser = config.parser_config()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            println!("code-chunker Configuration");
            println!("==========================\n");

            println!("Include patterns:");
            for pattern in &config.include_patterns {
                println!("  - {}", pattern);
            }

            println!("\nIgnore patterns:");
            for pattern in &config.ignore_patterns {
                println!("  - {}", pattern);
            }

            println!("\nLanguages: {}", config.languages.join(", "));
            println!("Max file size: {} bytes", config.max_file_bytes);

            println!("\nParser:");
            println!("  Use case: {}", parser.use_case);
            println!("  Escalation fraction: {}", parser.escalation_fraction);
            println!("  Id matching: {:?}", parser.id_match_strategy);
            println!("  Proximity lines: {}", parser.proximity_lines);
            match parser.cache_capacity {
                Some(capacity) => println!("  Cache capacity: {}", capacity),
                None => println!("  Cache capacity: unbounded"),
            }
            println!("  Diff timeout: {} ms", parser.diff_timeout_ms);
        }
    }

    Ok(())
}

/// Watch the workspace and reparse changed files
pub fn watch(path: &Path, debounce_ms: u64) -> Result<()> {
    use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
    use std::sync::mpsc::{channel, RecvTimeoutError};
    use std::time::Duration;

    let workspace = Workspace::open(path)?;
    let db = open_database(&workspace)?;
    let parser = hydrated_parser(&workspace, &db)?;

    println!("Watching for changes in {:?}...", workspace.root());
    println!("Press Ctrl+C to stop.\n");

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    watcher.watch(workspace.root(), RecursiveMode::Recursive)?;

    let debounce = Duration::from_millis(debounce_ms);
    let mut pending: BTreeSet<std::path::PathBuf> = BTreeSet::new();

    loop {
        match rx.recv_timeout(debounce) {
            Ok(Ok(event)) => {
                pending.extend(event.paths);
                continue;
            }
            Ok(Err(e)) => {
                warn!("Watch error: {}", e);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        for changed in std::mem::take(&mut pending) {
            if let Err(e) = refresh_file(&workspace, &parser, &db, &changed) {
                eprintln!("Reparse error: {:#}", e);
            }
        }
    }

    Ok(())
}

fn refresh_file(
    workspace: &Workspace,
    parser: &IncrementalParser,
    db: &Database,
    changed: &Path,
) -> Result<()> {
    let Ok(identity) = workspace.relative_identity(changed) else {
        return Ok(());
    };
    let config = workspace.config();
    if identity.is_empty()
        || identity.starts_with(STATE_DIR)
        || config.should_ignore(&identity)
        || !config.is_included(&identity)
    {
        return Ok(());
    }
    let Some(language) = config.language_for(Path::new(&identity)) else {
        return Ok(());
    };

    let file = SourceFile {
        path: workspace.root().join(&identity),
        identity,
        language,
    };

    if !file.path.exists() {
        parser.invalidate(&file.identity);
        if db.delete_snapshot(&file.identity)? {
            println!("✗ {} removed", file.identity);
        }
        return Ok(());
    }

    let text = workspace.read_source(&file)?;
    let outcome = parser.reparse_with_report(&file.identity, &text, file.language)?;
    if outcome.report.mode == ParseMode::Unchanged {
        return Ok(());
    }

    db.save_snapshot(&outcome.version, &text)?;
    println!(
        "📝 {} ({:?}: {} reparsed, {} kept{})",
        file.identity,
        outcome.report.mode,
        outcome.report.reparsed,
        outcome.report.survivors,
        outcome
            .report
            .escalation
            .as_deref()
            .map(|reason| format!(", {}", reason))
            .unwrap_or_default()
    );

    Ok(())
}

/// Print a file version in the requested format
pub fn print_version(version: &FileVersion, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = version.to_json().context("Failed to serialize file version")?;
            println!("{}", json);
        }
        OutputFormat::Text => print_version_text(version),
    }
    Ok(())
}

/// Print a file version in text format
pub fn print_version_text(version: &FileVersion) {
    println!(
        "{} ({}, {} lines, {} chunks{})",
        version.file_identity,
        version.language,
        version.line_count,
        version.chunks.len(),
        if version.recovered { ", recovered" } else { "" }
    );

    if version.chunks.is_empty() {
        println!("  No chunks.");
        return;
    }

    for chunk in &version.chunks {
        let name = if chunk.name.is_empty() {
            "<anonymous>"
        } else {
            chunk.name.as_str()
        };
        println!(
            "  {:>5}-{:<5} {:<10} {:<30} {:.2}",
            chunk.span.start_line,
            chunk.span.end_line,
            chunk.chunk_type.as_str(),
            name,
            chunk.confidence
        );
        println!("              id: {}", chunk.id);
    }
}

/// Print an index summary
pub fn print_summary(summary: &IndexSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Text => {
            println!("✓ Index complete");
            println!("  Files: {}", summary.files);
            println!("  Updated: {}", summary.updated);
            println!("  Unchanged: {}", summary.unchanged);
            println!("  Removed: {}", summary.removed);
            println!("  Chunks: {}", summary.chunks);
            if !summary.failed.is_empty() {
                println!("  Failed: {}", summary.failed.join(", "));
            }
        }
    }
    Ok(())
}
