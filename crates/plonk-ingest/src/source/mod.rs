//! Event source adapters.
//!
//! # Available Sources
//!
//! - [`JsonlSource`] - Replays JSONL files (one repository event per line)
//! - [`ChannelSource`] - Consumes events pushed by a live upstream subscriber,
//!   or by a reader thread over a line stream such as stdin
//!
//! # Architecture
//!
//! All sources implement the [`EventSource`] trait, so the ingestion service
//! consumes events the same way regardless of where they come from.

mod channel;
mod jsonl;

pub use channel::{ChannelSource, SourceMessage};
pub use jsonl::{JsonlConfig, JsonlSource};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use plonk_core::RepoEvent;

use crate::Result;

/// A source of repository events.
pub trait EventSource {
    /// Human-readable name for this source (used in logs and thread names).
    fn name(&self) -> &'static str;

    /// Feed events to `handler` until the source runs dry, `control` is
    /// stopped, or the handler asks to stop.
    ///
    /// The handler returns `Ok(true)` to continue, `Ok(false)` to stop
    /// gracefully, or `Err` to abort. Bad input and upstream errors are
    /// reported to `control` as they happen.
    fn process<F>(&mut self, control: &SourceControl, handler: F) -> Result<SourceStats>
    where
        F: FnMut(RepoEvent) -> Result<bool>;
}

/// State shared between a running source and whoever supervises it.
#[derive(Debug)]
pub struct SourceControl {
    running: AtomicBool,
    errors: AtomicUsize,
}

impl SourceControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            errors: AtomicUsize::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the source to stop at its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Count one unparseable input or upstream error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Default for SourceControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from processing an event source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Total events encountered, parseable or not.
    pub total_events: usize,

    /// Events handed to the handler.
    pub valid_events: usize,

    /// Input that could not be parsed as an event.
    pub invalid_events: usize,

    /// Errors reported by the upstream subscription.
    pub upstream_errors: usize,

    /// Source-specific metadata.
    pub source_metadata: SourceMetadata,
}

/// Source-specific metadata.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    /// For file-based sources: number of files processed.
    pub files_processed: Option<usize>,

    /// For file-based sources: total bytes read.
    pub bytes_read: Option<usize>,
}
