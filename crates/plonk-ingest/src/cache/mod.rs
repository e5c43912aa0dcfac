//! Local SQLite cache of paste and comment records.
//!
//! The cache is a derived, eventually-consistent projection of users' remote
//! repositories. [`CacheStore`] owns a single connection behind a mutex, which
//! serializes every write, so two upserts or an upsert and a delete of the
//! same `uri` never interleave.
//!
//! # Tables
//!
//! - `paste` - one row per paste, `shortUrl` unique
//! - `comment` - one row per comment, `pasteUri` not enforced
//! - `auth_session`, `auth_state` - opaque key-value rows for the OAuth client

mod auth;
mod comments;
mod pastes;
pub mod schema;

pub use auth::KvTable;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::{Error, Result};

/// A cached paste.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteRow {
    pub uri: String,
    pub short_url: String,
    pub author_did: String,
    pub code: String,
    pub lang: Option<String>,
    pub title: String,
    pub created_at: String,
    pub indexed_at: String,
    pub cid: Option<String>,
}

/// A cached comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRow {
    pub uri: String,
    pub author_did: String,
    pub body: String,
    pub created_at: String,
    pub indexed_at: String,
    pub paste_uri: String,
    pub paste_cid: String,
    pub cid: Option<String>,
}

/// A paste together with the comments attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasteWithComments {
    pub paste: PasteRow,
    pub comments: Vec<CommentRow>,
}

/// What an upsert did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row with this `uri` existed.
    Inserted,
    /// The row existed and its content or cid changed.
    Updated,
    /// The row already mirrored this content; only `indexedAt` moved.
    Unchanged,
    /// The stored row is newer than the incoming write; nothing was written.
    Stale,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Stale => "stale",
        }
    }
}

/// Keyset cursor for most-recent-first paste listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub indexed_at: String,
    pub uri: String,
}

impl PageCursor {
    /// Cursor that continues the listing after `row`.
    pub fn after(row: &PasteRow) -> Self {
        Self {
            indexed_at: row.indexed_at.clone(),
            uri: row.uri.clone(),
        }
    }
}

/// Format a time the way every `createdAt`/`indexedAt` column stores it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite-backed cache store.
///
/// Thread-safe: share it across threads via `Arc<CacheStore>`.
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open or create a cache at `path`. `":memory:"` opens an in-memory store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Self::open_in_memory();
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening cache database at {}", path.display());
        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL lets readers proceed while the ingester writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory store (for tests and `PLONK_DB_PATH=:memory:`).
    pub fn open_in_memory() -> Result<Self> {
        tracing::debug!("Opening in-memory cache database");
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn.lock();
        Ok(schema::get_schema_version(&conn)?)
    }

    /// Flush the WAL into the main database file.
    ///
    /// Called on shutdown, after the ingester has finished its last event.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock();
        // Not in WAL mode for in-memory stores; the pragma is then a no-op.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()?;
        Ok(())
    }
}

/// Map a UNIQUE violation on `paste.shortUrl` to [`Error::ShortUrlTaken`].
fn map_short_url_conflict(err: rusqlite::Error, short_url: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(e, Some(msg)) = &err
        && e.code == rusqlite::ErrorCode::ConstraintViolation
        && msg.contains("paste.shortUrl")
    {
        return Error::ShortUrlTaken(short_url.to_string());
    }
    Error::Sqlite(err)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    pub fn paste_row(uri: &str, short_url: &str, indexed_at: &str) -> PasteRow {
        PasteRow {
            uri: uri.to_string(),
            short_url: short_url.to_string(),
            author_did: "did:x".to_string(),
            code: "print(1)".to_string(),
            lang: Some("py".to_string()),
            title: "t".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            indexed_at: indexed_at.to_string(),
            cid: None,
        }
    }

    pub fn comment_row(uri: &str, paste_uri: &str, created_at: &str) -> CommentRow {
        CommentRow {
            uri: uri.to_string(),
            author_did: "did:y".to_string(),
            body: "nice".to_string(),
            created_at: created_at.to_string(),
            indexed_at: created_at.to_string(),
            paste_uri: paste_uri.to_string(),
            paste_cid: "bafyparent".to_string(),
            cid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory() {
        let store = CacheStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), schema::SCHEMA_VERSION);
        assert_eq!(store.paste_count().unwrap(), 0);
    }

    #[test]
    fn test_open_memory_path() {
        let store = CacheStore::open(":memory:").unwrap();
        assert_eq!(store.comment_count().unwrap(), 0);
    }

    #[test]
    fn test_on_disk_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("cache.db");

        {
            let store = CacheStore::open(&path).unwrap();
            store
                .upsert_paste(&test_util::paste_row(
                    "at://did:x/li.plonk.paste/1",
                    "ab",
                    "2024-01-01T00:00:00.000Z",
                ))
                .unwrap();
            store.checkpoint().unwrap();
        }

        let store = CacheStore::open(&path).unwrap();
        let row = store.paste_by_short_url("ab").unwrap().unwrap();
        assert_eq!(row.uri, "at://did:x/li.plonk.paste/1");
    }

    #[test]
    fn test_format_timestamp() {
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(at), "2024-01-01T00:00:00.123Z");
    }
}
