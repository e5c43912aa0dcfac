//! Paste table writes and queries.

use rusqlite::{OptionalExtension, Row, params};

use super::{
    CacheStore, CommentRow, PageCursor, PasteRow, PasteWithComments, UpsertOutcome,
    map_short_url_conflict,
};
use crate::Result;

const PASTE_COLUMNS: &str =
    "uri, shortUrl, authorDid, code, lang, title, createdAt, indexedAt, cid";

fn paste_from_row(row: &Row<'_>) -> rusqlite::Result<PasteRow> {
    Ok(PasteRow {
        uri: row.get("uri")?,
        short_url: row.get("shortUrl")?,
        author_did: row.get("authorDid")?,
        code: row.get("code")?,
        lang: row.get("lang")?,
        title: row.get("title")?,
        created_at: row.get("createdAt")?,
        indexed_at: row.get("indexedAt")?,
        cid: row.get("cid")?,
    })
}

impl CacheStore {
    /// Insert a paste, or update the mutable fields of an existing one.
    ///
    /// On a `uri` conflict only `code`, `lang`, `title`, `cid` and
    /// `indexedAt` are written; `shortUrl`, `authorDid` and `createdAt` keep
    /// their first values. A write whose `indexedAt` is older than the stored
    /// row is dropped and reported as [`UpsertOutcome::Stale`].
    ///
    /// Returns [`crate::Error::ShortUrlTaken`] when inserting a new row whose
    /// short URL belongs to another paste.
    pub fn upsert_paste(&self, row: &PasteRow) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT code, lang, title, cid, indexedAt FROM paste WHERE uri = ?1",
                [&row.uri],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some((_, _, _, _, indexed_at)) if indexed_at > row.indexed_at => {
                return Ok(UpsertOutcome::Stale);
            }
            Some((code, lang, title, cid, _)) => {
                let same_cid = row.cid.is_none() || row.cid == cid;
                if same_cid && code == row.code && lang == row.lang && title == row.title {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Updated
                }
            }
        };

        if outcome == UpsertOutcome::Inserted {
            tx.execute(
                "INSERT INTO paste (uri, shortUrl, authorDid, code, lang, title, createdAt, indexedAt, cid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.uri,
                    row.short_url,
                    row.author_did,
                    row.code,
                    row.lang,
                    row.title,
                    row.created_at,
                    row.indexed_at,
                    row.cid,
                ],
            )
            .map_err(|e| map_short_url_conflict(e, &row.short_url))?;
        } else {
            tx.execute(
                "UPDATE paste SET
                    code = ?2,
                    lang = ?3,
                    title = ?4,
                    cid = COALESCE(?5, cid),
                    indexedAt = ?6
                 WHERE uri = ?1",
                params![row.uri, row.code, row.lang, row.title, row.cid, row.indexed_at],
            )?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Remove a paste. Returns whether a row existed; absence is not an error.
    pub fn delete_paste(&self, uri: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM paste WHERE uri = ?1", [uri])?;
        Ok(changed > 0)
    }

    pub fn paste_by_uri(&self, uri: &str) -> Result<Option<PasteRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {PASTE_COLUMNS} FROM paste WHERE uri = ?1"),
                [uri],
                paste_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn paste_by_short_url(&self, short_url: &str) -> Result<Option<PasteRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {PASTE_COLUMNS} FROM paste WHERE shortUrl = ?1"),
                [short_url],
                paste_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Whether any paste holds `short_url`.
    pub fn short_url_exists(&self, short_url: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = conn
            .query_row(
                "SELECT 1 FROM paste WHERE shortUrl = ?1 LIMIT 1",
                [short_url],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    /// Total number of cached pastes.
    pub fn paste_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM paste", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Number of pastes whose short URL is exactly `length` characters.
    pub fn short_url_count(&self, length: usize) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM paste WHERE length(shortUrl) = ?1",
            [length as i64],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Most recently indexed pastes first, `limit` per page.
    ///
    /// Pass the [`PageCursor`] of the last row of a page to get the next one.
    pub fn recent_pastes(&self, limit: usize, before: Option<&PageCursor>) -> Result<Vec<PasteRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PASTE_COLUMNS} FROM paste
             WHERE ?1 IS NULL OR indexedAt < ?1 OR (indexedAt = ?1 AND uri < ?2)
             ORDER BY indexedAt DESC, uri DESC
             LIMIT ?3"
        ))?;

        let rows = stmt
            .query_map(
                params![
                    before.map(|c| c.indexed_at.as_str()),
                    before.map(|c| c.uri.as_str()),
                    limit as i64,
                ],
                paste_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Pastes by one author, most recently indexed first.
    pub fn pastes_by_author(&self, author_did: &str, limit: usize) -> Result<Vec<PasteRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PASTE_COLUMNS} FROM paste
             WHERE authorDid = ?1
             ORDER BY indexedAt DESC, uri DESC
             LIMIT ?2"
        ))?;

        let rows = stmt
            .query_map(params![author_did, limit as i64], paste_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// A paste and its comments, oldest comment first, looked up by short URL.
    pub fn paste_with_comments(&self, short_url: &str) -> Result<Option<PasteWithComments>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT
                p.uri, p.shortUrl, p.authorDid, p.code, p.lang, p.title,
                p.createdAt, p.indexedAt, p.cid,
                c.uri, c.authorDid, c.body, c.createdAt, c.indexedAt,
                c.pasteUri, c.pasteCid, c.cid
             FROM paste p
             LEFT JOIN comment c ON c.pasteUri = p.uri
             WHERE p.shortUrl = ?1
             ORDER BY c.createdAt ASC, c.uri ASC",
        )?;

        let mut rows = stmt.query([short_url])?;
        let mut paste: Option<PasteRow> = None;
        let mut comments = Vec::new();

        while let Some(r) = rows.next()? {
            if paste.is_none() {
                paste = Some(PasteRow {
                    uri: r.get(0)?,
                    short_url: r.get(1)?,
                    author_did: r.get(2)?,
                    code: r.get(3)?,
                    lang: r.get(4)?,
                    title: r.get(5)?,
                    created_at: r.get(6)?,
                    indexed_at: r.get(7)?,
                    cid: r.get(8)?,
                });
            }

            // NULL comment columns mean the paste has no comments
            let comment_uri: Option<String> = r.get(9)?;
            if let Some(uri) = comment_uri {
                comments.push(CommentRow {
                    uri,
                    author_did: r.get(10)?,
                    body: r.get(11)?,
                    created_at: r.get(12)?,
                    indexed_at: r.get(13)?,
                    paste_uri: r.get(14)?,
                    paste_cid: r.get(15)?,
                    cid: r.get(16)?,
                });
            }
        }

        Ok(paste.map(|paste| PasteWithComments { paste, comments }))
    }
}
