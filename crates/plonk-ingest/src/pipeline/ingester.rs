//! Applies repository events to the cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use plonk_core::{
    AtUri, Collection, CommentRecord, Operation, PasteRecord, Record, RepoEvent, validate_record,
};
use tracing::{debug, warn};

use crate::Result;
use crate::cache::{CacheStore, CommentRow, PasteRow, UpsertOutcome, format_timestamp};
use crate::shorturl::ShortUrlAllocator;

/// Source of `indexedAt` timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a paste or comment collection.
    Ignored,
    /// The record failed validation and was dropped.
    Rejected(String),
    /// The record was written (or found already current).
    Upserted(UpsertOutcome),
    /// A delete was applied; `existed` is false for repeated deletes.
    Deleted { existed: bool },
}

impl EventOutcome {
    /// Label used for the `outcome` metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Rejected(_) => "rejected",
            Self::Upserted(outcome) => outcome.as_str(),
            Self::Deleted { .. } => "deleted",
        }
    }
}

/// Materializes paste and comment events into a [`CacheStore`].
///
/// Events may arrive duplicated or out of order. An update for a record the
/// cache has never seen is treated as a create, and replaying the same event
/// converges to the same row.
pub struct Ingester {
    store: Arc<CacheStore>,
    allocator: Arc<ShortUrlAllocator>,
    clock: Clock,
}

impl Ingester {
    pub fn new(store: Arc<CacheStore>, allocator: Arc<ShortUrlAllocator>) -> Self {
        Self {
            store,
            allocator,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock used for `indexedAt`.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Apply one event.
    ///
    /// Invalid records come back as [`EventOutcome::Rejected`]; only storage
    /// failures are returned as errors.
    pub fn apply_event(&self, event: &RepoEvent) -> Result<EventOutcome> {
        let Some(collection) = event.known_collection() else {
            debug!("Ignoring event for collection {}", event.collection);
            return Ok(EventOutcome::Ignored);
        };

        if let Err(e) = AtUri::parse(&event.uri) {
            return Ok(self.reject(event, e.to_string()));
        }

        let outcome = match event.event {
            Operation::Delete => {
                let existed = match collection {
                    Collection::Paste => self.store.delete_paste(&event.uri)?,
                    Collection::Comment => self.store.delete_comment(&event.uri)?,
                };
                debug!(
                    "Deleted {} {} (existed: {})",
                    collection.as_str(),
                    event.uri,
                    existed
                );
                EventOutcome::Deleted { existed }
            }
            Operation::Create | Operation::Update => {
                let Some(value) = event.record.as_ref() else {
                    return Ok(self.reject(event, "missing record".to_string()));
                };
                let record = match validate_record(collection, value) {
                    Ok(record) => record,
                    Err(e) => return Ok(self.reject(event, e.to_string())),
                };

                let outcome = match record {
                    Record::Paste(paste) => self.upsert_paste(event, paste)?,
                    Record::Comment(comment) => self.upsert_comment(event, comment)?,
                };

                // A create for a row we already hold means the optimistic
                // local write and the repository disagree.
                if event.event == Operation::Create && outcome == UpsertOutcome::Updated {
                    warn!(
                        "Cached {} {} diverged from its repository record (cid {:?})",
                        collection.as_str(),
                        event.uri,
                        event.cid
                    );
                    metrics::counter!("reconcile_divergence_total").increment(1);
                }

                debug!(
                    "{} {} {}",
                    outcome.as_str(),
                    collection.as_str(),
                    event.uri
                );
                EventOutcome::Upserted(outcome)
            }
        };

        metrics::counter!("ingest_events_total", "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    fn upsert_paste(&self, event: &RepoEvent, paste: PasteRecord) -> Result<UpsertOutcome> {
        let indexed_at = format_timestamp((self.clock)());
        let row_with = |short_url: &str| PasteRow {
            uri: event.uri.clone(),
            short_url: short_url.to_string(),
            author_did: event.did.clone(),
            code: paste.code.clone(),
            lang: Some(paste.lang.clone()),
            title: paste.title.clone(),
            created_at: paste.created_at.clone(),
            indexed_at: indexed_at.clone(),
            cid: event.cid.clone(),
        };

        // A cached paste keeps the short URL it was first given
        if let Some(existing) = self.store.paste_by_uri(&event.uri)? {
            return self.store.upsert_paste(&row_with(&existing.short_url));
        }

        let (row, outcome) = self.allocator.insert_with_short_url(
            &self.store,
            paste.short_url.as_deref(),
            row_with,
        )?;
        if paste.short_url.as_deref().is_some_and(|s| s != row.short_url) {
            debug!(
                "Record short URL for {} was taken, cached as {}",
                row.uri, row.short_url
            );
        }
        Ok(outcome)
    }

    fn upsert_comment(&self, event: &RepoEvent, comment: CommentRecord) -> Result<UpsertOutcome> {
        let row = CommentRow {
            uri: event.uri.clone(),
            author_did: event.did.clone(),
            body: comment.content,
            created_at: comment.created_at,
            indexed_at: format_timestamp((self.clock)()),
            paste_uri: comment.post.uri,
            paste_cid: comment.post.cid,
            cid: event.cid.clone(),
        };
        self.store.upsert_comment(&row)
    }

    fn reject(&self, event: &RepoEvent, reason: String) -> EventOutcome {
        warn!(
            "Dropping {} event for {}: {}",
            event.event.as_str(),
            event.uri,
            reason
        );
        metrics::counter!("ingest_events_total", "outcome" => "rejected").increment(1);
        EventOutcome::Rejected(reason)
    }
}
