//! Local write path: publish a record to the author's repository, then cache
//! it optimistically so it is readable before the stream delivers it.
//!
//! The optimistic row records the `cid` returned by the repository. When the
//! stream later delivers the same record, the ingester finds the row already
//! current ([`UpsertOutcome::Unchanged`]); if the repository's version
//! differs, the stream's content wins and the divergence is counted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use plonk_core::{Collection, CommentRecord, PasteRecord, StrongRef, validate_record};
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CacheStore, CommentRow, PasteRow, UpsertOutcome, format_timestamp};
use crate::pipeline::Clock;
use crate::shorturl::ShortUrlAllocator;
use crate::{Error, Result};

/// A record as stored by the remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRecord {
    pub uri: String,
    pub cid: String,
}

/// Writes records to a user's remote repository.
///
/// Implementations report failures as [`Error::Publish`].
pub trait RepoWriter: Send + Sync {
    fn put_record(&self, did: &str, collection: Collection, record: &Value)
    -> Result<WrittenRecord>;
}

/// User-supplied fields of a new paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteDraft {
    pub code: String,
    pub lang: String,
    pub title: String,
}

/// Result of publishing a paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPaste {
    pub uri: String,
    pub cid: String,
    /// Short URL the paste is cached under.
    pub short_url: String,
    /// Whether the optimistic cache write succeeded.
    pub cached: bool,
}

/// Result of publishing a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedComment {
    pub uri: String,
    pub cid: String,
    pub cached: bool,
}

/// Publishes pastes and comments and mirrors them into the cache.
pub struct Publisher<W> {
    writer: W,
    store: Arc<CacheStore>,
    allocator: Arc<ShortUrlAllocator>,
    clock: Clock,
}

impl<W: RepoWriter> Publisher<W> {
    pub fn new(writer: W, store: Arc<CacheStore>, allocator: Arc<ShortUrlAllocator>) -> Self {
        Self {
            writer,
            store,
            allocator,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock used for `createdAt` and `indexedAt`.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Publish a new paste by `author_did`.
    ///
    /// Fails with [`Error::Validation`] before anything is written if the
    /// draft is invalid, and with [`Error::Publish`] if the repository write
    /// fails. A failed cache write after a successful publish is logged and
    /// reported through [`PublishedPaste::cached`]; ingestion repairs it.
    pub fn publish_paste(&self, author_did: &str, draft: PasteDraft) -> Result<PublishedPaste> {
        let short_url = self.allocator.allocate(&self.store)?;
        let created_at = format_timestamp((self.clock)());

        let record = PasteRecord {
            code: draft.code,
            lang: draft.lang,
            title: draft.title,
            created_at,
            short_url: Some(short_url.clone()),
        };
        let value = record.to_value();
        validate_record(Collection::Paste, &value)?;

        let written = self.put(author_did, Collection::Paste, &value)?;
        info!("Published paste {} as {}", written.uri, short_url);

        let indexed_at = format_timestamp((self.clock)());
        let cached = self.allocator.insert_with_short_url(
            &self.store,
            Some(&short_url),
            |short| PasteRow {
                uri: written.uri.clone(),
                short_url: short.to_string(),
                author_did: author_did.to_string(),
                code: record.code.clone(),
                lang: Some(record.lang.clone()),
                title: record.title.clone(),
                created_at: record.created_at.clone(),
                indexed_at: indexed_at.clone(),
                cid: Some(written.cid.clone()),
            },
        );

        let (short_url, cached) = match cached {
            Ok((row, _)) => (row.short_url, true),
            Err(e) => {
                warn!("Published paste {} but caching it failed: {}", written.uri, e);
                metrics::counter!("publish_cache_failures_total").increment(1);
                (short_url, false)
            }
        };

        Ok(PublishedPaste {
            uri: written.uri,
            cid: written.cid,
            short_url,
            cached,
        })
    }

    /// Publish a comment by `author_did` on the paste at `paste_uri`.
    pub fn publish_comment(
        &self,
        author_did: &str,
        paste_uri: &str,
        paste_cid: &str,
        body: &str,
    ) -> Result<PublishedComment> {
        let record = CommentRecord {
            content: body.to_string(),
            created_at: format_timestamp((self.clock)()),
            post: StrongRef {
                uri: paste_uri.to_string(),
                cid: paste_cid.to_string(),
            },
        };
        let value = record.to_value();
        validate_record(Collection::Comment, &value)?;

        let written = self.put(author_did, Collection::Comment, &value)?;
        info!("Published comment {} on {}", written.uri, paste_uri);

        let row = CommentRow {
            uri: written.uri.clone(),
            author_did: author_did.to_string(),
            body: record.content,
            created_at: record.created_at,
            indexed_at: format_timestamp((self.clock)()),
            paste_uri: record.post.uri,
            paste_cid: record.post.cid,
            cid: Some(written.cid.clone()),
        };

        let cached = match self.store.upsert_comment(&row) {
            Ok(UpsertOutcome::Stale) => {
                warn!("Cached comment {} is newer than the published one", row.uri);
                true
            }
            Ok(_) => true,
            Err(e) => {
                warn!("Published comment {} but caching it failed: {}", row.uri, e);
                metrics::counter!("publish_cache_failures_total").increment(1);
                false
            }
        };

        Ok(PublishedComment {
            uri: written.uri,
            cid: written.cid,
            cached,
        })
    }

    fn put(&self, did: &str, collection: Collection, record: &Value) -> Result<WrittenRecord> {
        let written = self
            .writer
            .put_record(did, collection, record)
            .map_err(|e| match e {
                Error::Publish(_) => e,
                other => Error::Publish(other.to_string()),
            })?;
        metrics::counter!("publish_records_total", "collection" => collection.as_str())
            .increment(1);
        Ok(written)
    }
}
