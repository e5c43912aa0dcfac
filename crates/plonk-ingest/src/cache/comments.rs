//! Comment table writes and queries.

use rusqlite::{OptionalExtension, Row, params};

use super::{CacheStore, CommentRow, UpsertOutcome};
use crate::Result;

const COMMENT_COLUMNS: &str =
    "uri, authorDid, body, createdAt, indexedAt, pasteUri, pasteCid, cid";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        uri: row.get("uri")?,
        author_did: row.get("authorDid")?,
        body: row.get("body")?,
        created_at: row.get("createdAt")?,
        indexed_at: row.get("indexedAt")?,
        paste_uri: row.get("pasteUri")?,
        paste_cid: row.get("pasteCid")?,
        cid: row.get("cid")?,
    })
}

impl CacheStore {
    /// Insert a comment, or update an existing one in place.
    ///
    /// The parent paste does not have to be cached: the firehose may deliver a
    /// comment before its paste, or after the paste was deleted. `authorDid`
    /// and `createdAt` keep their first values.
    pub fn upsert_comment(&self, row: &CommentRow) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT body, pasteUri, pasteCid, cid, indexedAt FROM comment WHERE uri = ?1",
                [&row.uri],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
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
            Some((body, paste_uri, paste_cid, cid, _)) => {
                let same_cid = row.cid.is_none() || row.cid == cid;
                if same_cid
                    && body == row.body
                    && paste_uri == row.paste_uri
                    && paste_cid == row.paste_cid
                {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Updated
                }
            }
        };

        if outcome == UpsertOutcome::Inserted {
            tx.execute(
                "INSERT INTO comment (uri, authorDid, body, createdAt, indexedAt, pasteUri, pasteCid, cid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.uri,
                    row.author_did,
                    row.body,
                    row.created_at,
                    row.indexed_at,
                    row.paste_uri,
                    row.paste_cid,
                    row.cid,
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE comment SET
                    body = ?2,
                    pasteUri = ?3,
                    pasteCid = ?4,
                    cid = COALESCE(?5, cid),
                    indexedAt = ?6
                 WHERE uri = ?1",
                params![
                    row.uri,
                    row.body,
                    row.paste_uri,
                    row.paste_cid,
                    row.cid,
                    row.indexed_at
                ],
            )?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Remove a comment. Returns whether a row existed.
    pub fn delete_comment(&self, uri: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM comment WHERE uri = ?1", [uri])?;
        Ok(changed > 0)
    }

    pub fn comment_by_uri(&self, uri: &str) -> Result<Option<CommentRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comment WHERE uri = ?1"),
                [uri],
                comment_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Total number of cached comments.
    pub fn comment_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM comment", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Comments on the paste at `paste_uri`, oldest first.
    pub fn comments_for_paste(&self, paste_uri: &str) -> Result<Vec<CommentRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comment
             WHERE pasteUri = ?1
             ORDER BY createdAt ASC, uri ASC"
        ))?;

        let rows = stmt
            .query_map([paste_uri], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
