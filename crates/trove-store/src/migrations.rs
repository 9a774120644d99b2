//! Database schema migrations.
//!
//! Applies the initial schema: the canonical `records` table, the
//! `lexical_docs` table with its FTS5 shadow, and the migrations tracking
//! table.

use rusqlite::Connection;
use tracing::info;

use trove_core::error::TroveError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<(), TroveError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| TroveError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| TroveError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), TroveError> {
    conn.execute_batch(
        "
        -- Canonical embedding record set. One live row per (id, model_tag).
        CREATE TABLE IF NOT EXISTS records (
            id              TEXT NOT NULL,
            model_tag       TEXT NOT NULL,
            content_hash    BLOB NOT NULL
                            CHECK (length(content_hash) = 32),
            vector          BLOB NOT NULL,
            text            TEXT NOT NULL DEFAULT '',
            metadata        TEXT NOT NULL DEFAULT '{}',
            version         INTEGER NOT NULL DEFAULT 1,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (id, model_tag)
        );

        CREATE INDEX IF NOT EXISTS idx_records_model_tag
            ON records (model_tag);

        -- Lexical index content. Rows are written by LexicalIndex, not by
        -- the record store; the FTS5 shadow below is kept in sync through
        -- triggers so index-time and query-time tokenization are identical.
        CREATE TABLE IF NOT EXISTS lexical_docs (
            doc_id          TEXT NOT NULL,
            model_tag       TEXT NOT NULL,
            text            TEXT NOT NULL,
            UNIQUE (doc_id, model_tag)
        );

        CREATE INDEX IF NOT EXISTS idx_lexical_docs_model_tag
            ON lexical_docs (model_tag);

        CREATE VIRTUAL TABLE IF NOT EXISTS lexical_fts USING fts5(
            text,
            content='lexical_docs',
            content_rowid='rowid',
            tokenize='unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS lexical_docs_ai
        AFTER INSERT ON lexical_docs BEGIN
            INSERT INTO lexical_fts (rowid, text)
            VALUES (new.rowid, new.text);
        END;

        CREATE TRIGGER IF NOT EXISTS lexical_docs_ad
        AFTER DELETE ON lexical_docs BEGIN
            INSERT INTO lexical_fts (lexical_fts, rowid, text)
            VALUES ('delete', old.rowid, old.text);
        END;

        CREATE TRIGGER IF NOT EXISTS lexical_docs_au
        AFTER UPDATE ON lexical_docs BEGIN
            INSERT INTO lexical_fts (lexical_fts, rowid, text)
            VALUES ('delete', old.rowid, old.text);
            INSERT INTO lexical_fts (rowid, text)
            VALUES (new.rowid, new.text);
        END;

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| TroveError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
