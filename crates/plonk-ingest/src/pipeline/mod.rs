//! Ingestion pipeline.
//!
//! - [`Ingester`] - applies one [`RepoEvent`](plonk_core::RepoEvent) to the cache
//! - [`IngestService`] - runs an ingester over an event source on its own thread
//!
//! # Architecture
//!
//! ```text
//! [EventSource] → [IngestService] → [Ingester] → [CacheStore]
//!                                        ↓
//!                               [ShortUrlAllocator]
//! ```
//!
//! The cache is a derived projection of users' repositories: losing it only
//! costs a replay of the stream.

mod ingester;
mod service;

pub use ingester::{Clock, EventOutcome, Ingester};
pub use service::{IngestHandle, IngestService, IngestStats};
