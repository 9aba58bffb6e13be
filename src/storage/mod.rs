//! Storage for chunk tables
//!
//! This module provides:
//! - `ChunkStore`, the concurrent in-memory cache the parser publishes to
//! - `Database`, SQLite persistence of file versions across processes

pub mod cache;
mod schema;

pub use cache::{CacheStats, ChunkStore, Snapshot, WriteGuard};
pub use schema::SCHEMA;

use crate::extract::{ChunkType, Metadata};
use crate::incremental::{Chunk, FileVersion, Span};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// A persisted version with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub version: FileVersion,
    pub text: String,
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    // ==================== Index State ====================

    /// Get the time of the last completed index run
    pub fn get_last_indexed(&self) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row("SELECT indexed_at FROM index_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .context("Failed to get last index time")?;

        Ok(result)
    }

    /// Record a completed index run
    pub fn set_last_indexed(&self, files: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO index_state (id, files, indexed_at) VALUES (1, ?1, datetime('now'))",
                params![files as i64],
            )
            .context("Failed to record index run")?;
        Ok(())
    }

    // ==================== Snapshots ====================

    /// Insert or replace a file's version and its chunk rows
    pub fn save_snapshot(&self, version: &FileVersion, text: &str) -> Result<()> {
        let json = version
            .to_json()
            .with_context(|| format!("Failed to serialize {}", version.file_identity))?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        tx.execute(
            r#"
            INSERT INTO file_versions (
                file_identity, language, text_hash, line_count,
                version_json, source_text, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(file_identity) DO UPDATE SET
                language = excluded.language,
                text_hash = excluded.text_hash,
                line_count = excluded.line_count,
                version_json = excluded.version_json,
                source_text = excluded.source_text,
                updated_at = datetime('now')
            "#,
            params![
                version.file_identity,
                version.language.to_string(),
                version.text_hash,
                version.line_count as i64,
                json,
                text,
            ],
        )
        .context("Failed to upsert file version")?;

        tx.execute(
            "DELETE FROM chunks WHERE file_identity = ?1",
            params![version.file_identity],
        )
        .context("Failed to clear chunk rows")?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks (
                    id, file_identity, chunk_type, name, start_line, end_line,
                    content_hash, confidence, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;

            for chunk in &version.chunks {
                let metadata = serde_json::to_string(&chunk.metadata)?;
                stmt.execute(params![
                    chunk.id,
                    version.file_identity,
                    chunk.chunk_type.as_str(),
                    chunk.name,
                    chunk.span.start_line as i64,
                    chunk.span.end_line as i64,
                    chunk.content_hash,
                    chunk.confidence as f64,
                    metadata,
                ])
                .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
            }
        }

        tx.commit().context("Failed to commit snapshot")?;
        Ok(())
    }

    /// Load a file's version and source text
    pub fn load_snapshot(&self, file_identity: &str) -> Result<Option<StoredSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT version_json, source_text FROM file_versions WHERE file_identity = ?1",
                params![file_identity],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to load snapshot")?;

        row.map(|(json, text)| decode_snapshot(&json, text)).transpose()
    }

    /// Load every stored snapshot
    pub fn load_all_snapshots(&self) -> Result<Vec<StoredSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT version_json, source_text FROM file_versions ORDER BY file_identity",
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(json, text)| decode_snapshot(&json, text))
            .collect()
    }

    /// Delete a file's version and chunk rows
    pub fn delete_snapshot(&self, file_identity: &str) -> Result<bool> {
        self.conn
            .execute(
                "DELETE FROM chunks WHERE file_identity = ?1",
                params![file_identity],
            )
            .context("Failed to delete chunk rows")?;
        let count = self
            .conn
            .execute(
                "DELETE FROM file_versions WHERE file_identity = ?1",
                params![file_identity],
            )
            .context("Failed to delete file version")?;

        Ok(count > 0)
    }

    /// Identities of every stored file
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_identity FROM file_versions ORDER BY file_identity")?;

        let files = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(files)
    }

    // ==================== Chunks ====================

    /// Get the chunk rows of a file, in file order
    pub fn get_chunks_for_file(&self, file_identity: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, chunk_type, name, start_line, end_line,
                   content_hash, confidence, metadata
            FROM chunks WHERE file_identity = ?1
            ORDER BY start_line
            "#,
        )?;

        let rows = stmt.query_map(params![file_identity], |row| {
            Ok(ChunkRow {
                id: row.get(0)?,
                chunk_type: row.get(1)?,
                name: row.get(2)?,
                start_line: row.get(3)?,
                end_line: row.get(4)?,
                content_hash: row.get(5)?,
                confidence: row.get(6)?,
                metadata: row.get(7)?,
            })
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?.into_chunk()?);
        }
        Ok(chunks)
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let files: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM file_versions", [], |row| row.get(0))?;

        let chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        let recovered_files = self
            .load_all_snapshots()?
            .iter()
            .filter(|s| s.version.recovered)
            .count();

        Ok(DatabaseStats {
            files: files as usize,
            chunks: chunks as usize,
            recovered_files,
            last_indexed: self.get_last_indexed()?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseStats {
    pub files: usize,
    pub chunks: usize,
    /// Files whose stored version came from error recovery
    pub recovered_files: usize,
    pub last_indexed: Option<String>,
}

fn decode_snapshot(json: &str, text: String) -> Result<StoredSnapshot> {
    let version = FileVersion::from_json(json).context("Failed to decode stored file version")?;
    Ok(StoredSnapshot { version, text })
}

// Internal row type for database mapping

struct ChunkRow {
    id: String,
    chunk_type: String,
    name: String,
    start_line: i64,
    end_line: i64,
    content_hash: String,
    confidence: f64,
    metadata: String,
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk> {
        let chunk_type: ChunkType =
            serde_json::from_value(serde_json::Value::String(self.chunk_type.clone()))
                .with_context(|| format!("Unknown chunk type {}", self.chunk_type))?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .with_context(|| format!("Invalid metadata for chunk {}", self.id))?;

        Ok(Chunk {
            id: self.id,
            chunk_type,
            name: self.name,
            span: Span::new(self.start_line as usize, self.end_line as usize),
            content_hash: self.content_hash,
            confidence: self.confidence as f32,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Language;
    use crate::incremental::{IncrementalParser, ParserConfig};

    const SOURCE: &str = "import os\n\ndef main():\n    return os.getcwd()\n";

    fn parsed(file: &str) -> FileVersion {
        let parser = IncrementalParser::new(ParserConfig::default()).unwrap();
        (*parser.parse(file, SOURCE, Language::Python).unwrap()).clone()
    }

    #[test]
    fn test_database_creation() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.chunks, 0);
        assert!(stats.last_indexed.is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let version = parsed("app.py");
        db.save_snapshot(&version, SOURCE).unwrap();

        let stored = db.load_snapshot("app.py").unwrap().unwrap();
        assert_eq!(stored.version, version);
        assert_eq!(stored.text, SOURCE);

        let chunks = db.get_chunks_for_file("app.py").unwrap();
        assert_eq!(chunks, version.chunks);
        assert!(db.load_snapshot("missing.py").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_chunk_rows() {
        let db = Database::open_in_memory().unwrap();
        let mut version = parsed("app.py");
        db.save_snapshot(&version, SOURCE).unwrap();

        version.chunks.truncate(1);
        db.save_snapshot(&version, SOURCE).unwrap();
        assert_eq!(db.get_chunks_for_file("app.py").unwrap().len(), 1);
        assert_eq!(db.get_stats().unwrap().chunks, 1);
    }

    #[test]
    fn test_delete_and_list() {
        let db = Database::open_in_memory().unwrap();
        db.save_snapshot(&parsed("a.py"), SOURCE).unwrap();
        db.save_snapshot(&parsed("b.py"), SOURCE).unwrap();
        assert_eq!(db.list_files().unwrap(), vec!["a.py".to_string(), "b.py".to_string()]);
        assert_eq!(db.load_all_snapshots().unwrap().len(), 2);

        assert!(db.delete_snapshot("a.py").unwrap());
        assert!(!db.delete_snapshot("a.py").unwrap());
        assert_eq!(db.get_stats().unwrap().files, 1);
        assert!(db.get_chunks_for_file("a.py").unwrap().is_empty());
    }

    #[test]
    fn test_index_state() {
        let db = Database::open_in_memory().unwrap();
        db.set_last_indexed(3).unwrap();
        assert!(db.get_last_indexed().unwrap().is_some());
    }
}
