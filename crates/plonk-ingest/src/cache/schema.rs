//! SQLite schema for the paste cache.
//!
//! Migrations are forward-only and numbered. A fresh database replays every
//! migration from version 0, so a new store and an upgraded one always end up
//! with the same schema.

use rusqlite::{Connection, OptionalExtension, Result};

/// Current schema version. Increment when adding a migration.
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema, running any pending migrations.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        migrate(conn, current_version, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Run migrations `from+1 ..= to`, each in its own transaction.
pub(crate) fn migrate(conn: &Connection, from: i32, to: i32) -> Result<()> {
    for version in from..to {
        let tx = conn.unchecked_transaction()?;
        match version {
            0 => migrate_v0_to_v1(&tx)?,
            1 => migrate_v1_to_v2(&tx)?,
            2 => migrate_v2_to_v3(&tx)?,
            _ => {}
        }
        set_schema_version(&tx, version + 1)?;
        tx.commit()?;
        tracing::debug!("Cache schema migrated to v{}", version + 1);
    }
    Ok(())
}

/// v1: pastes and the OAuth key-value tables.
fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS paste (
            uri TEXT PRIMARY KEY,
            shortUrl TEXT NOT NULL UNIQUE,
            authorDid TEXT NOT NULL,
            code TEXT NOT NULL,
            lang TEXT,
            title TEXT NOT NULL,
            createdAt TEXT NOT NULL,
            indexedAt TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auth_session (
            key TEXT PRIMARY KEY,
            session TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auth_state (
            key TEXT PRIMARY KEY,
            state TEXT NOT NULL
        );
        "#,
    )
}

/// v2: comments.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS comment (
            uri TEXT PRIMARY KEY,
            authorDid TEXT NOT NULL,
            body TEXT NOT NULL,
            createdAt TEXT NOT NULL,
            indexedAt TEXT NOT NULL,
            pasteUri TEXT NOT NULL,
            pasteCid TEXT NOT NULL
        );
        "#,
    )
}

/// v3: record cids for reconciliation, plus listing indexes.
fn migrate_v2_to_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE paste ADD COLUMN cid TEXT;
        ALTER TABLE comment ADD COLUMN cid TEXT;

        CREATE INDEX IF NOT EXISTS idx_paste_indexed_at ON paste(indexedAt DESC, uri DESC);
        CREATE INDEX IF NOT EXISTS idx_paste_author ON paste(authorDid, indexedAt DESC);
        CREATE INDEX IF NOT EXISTS idx_comment_paste_uri ON comment(pasteUri, createdAt);
        "#,
    )
}
