//! Plonk cache ingestion.
//!
//! This crate keeps a local SQLite cache of paste and comment records in sync
//! with users' repositories, fed by the network's shared event stream.
//!
//! # Modules
//!
//! - [`cache`] - SQLite store, schema migrations, read queries
//! - [`shorturl`] - Short URL allocation
//! - [`pipeline`] - Event application and the background ingestion service
//! - [`source`] - Event source adapters (JSONL replay, live channel, stdin)
//! - [`publish`] - Local write path with optimistic caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │  Event Sources  │      │    Publisher    │  (local writes)
//! └────────┬────────┘      └───┬─────────┬───┘
//!          │                   │         │
//!          ▼                   │         ▼
//! ┌─────────────────┐          │   ┌───────────┐
//! │ IngestService / │          │   │ RepoWriter│  remote repository
//! │    Ingester     │          │   └───────────┘
//! └────────┬────────┘          │
//!          │   ┌───────────────┘
//!          ▼   ▼
//! ┌─────────────────┐      ┌───────────────────┐
//! │   CacheStore    │ ◄──► │ ShortUrlAllocator │
//! └─────────────────┘      └───────────────────┘
//! ```
//!
//! The repositories are the source of truth; the cache is a derived,
//! eventually-consistent projection that can be rebuilt by replaying events.

pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod shorturl;
pub mod source;

pub use error::{Error, Result};

pub use cache::{
    CacheStore, CommentRow, KvTable, PageCursor, PasteRow, PasteWithComments, UpsertOutcome,
};
pub use config::Config;
pub use pipeline::{EventOutcome, IngestHandle, IngestService, IngestStats, Ingester};
pub use publish::{
    PasteDraft, PublishedComment, PublishedPaste, Publisher, RepoWriter, WrittenRecord,
};
pub use shorturl::{AllocatorConfig, ShortUrlAllocator};
pub use source::{
    ChannelSource, EventSource, JsonlConfig, JsonlSource, SourceControl, SourceMessage,
    SourceMetadata, SourceStats,
};
