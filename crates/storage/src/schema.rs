use rusqlite::Connection;

use crate::error::StorageError;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -8000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS entities (
    seq INTEGER PRIMARY KEY,
    entity_id BLOB NOT NULL UNIQUE CHECK (length(entity_id) = 16),
    entity_type TEXT NOT NULL,
    scope_id BLOB CHECK (scope_id IS NULL OR length(scope_id) = 16),
    synced INTEGER NOT NULL CHECK (synced IN (0, 1)),
    is_deleted INTEGER NOT NULL DEFAULT 0,
    payload BLOB NOT NULL,
    stored_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_entities_lookup ON entities (entity_type, scope_id, synced);
CREATE INDEX IF NOT EXISTS idx_entities_pending ON entities (seq) WHERE synced = 0;

CREATE TABLE IF NOT EXISTS collection_cursors (
    entity_type TEXT NOT NULL,
    scope_id BLOB NOT NULL,
    cursor TEXT,
    reached_end INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    PRIMARY KEY (entity_type, scope_id)
);
";
