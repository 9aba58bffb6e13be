//! Database schema definition

/// SQL schema for the chunk database
pub const SCHEMA: &str = r#"
-- Index run tracking
CREATE TABLE IF NOT EXISTS index_state (
    id INTEGER PRIMARY KEY,
    files INTEGER NOT NULL,
    indexed_at TEXT NOT NULL
);

-- One row per file: the serialized version and the text it was parsed from
CREATE TABLE IF NOT EXISTS file_versions (
    file_identity TEXT PRIMARY KEY,
    language TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    line_count INTEGER NOT NULL,
    version_json TEXT NOT NULL,
    source_text TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Chunk rows mirrored from file_versions for querying
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    file_identity TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    name TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    confidence REAL NOT NULL,
    metadata TEXT NOT NULL,
    PRIMARY KEY (file_identity, id),
    FOREIGN KEY (file_identity) REFERENCES file_versions(file_identity) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_identity);
CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(content_hash);
CREATE INDEX IF NOT EXISTS idx_chunks_name ON chunks(name);
"#;
