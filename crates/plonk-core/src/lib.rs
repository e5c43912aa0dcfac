//! Core types, validation, and shared utilities for the Plonk cache.
//!
//! This crate provides:
//! - Paste and comment record schemas with two-stage validation
//! - The repository event type delivered by the firehose
//! - `at://` URI parsing
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod event;
pub mod metrics;
pub mod record;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Collection NSID for paste records.
pub const PASTE_NSID: &str = "li.plonk.paste";

/// Collection NSID for comment records.
pub const COMMENT_NSID: &str = "li.plonk.comment";

/// Paste NSID used before the namespace moved to `li.plonk`.
pub const LEGACY_PASTE_NSID: &str = "ovh.plonk.paste";

/// Comment NSID used before the namespace moved to `li.plonk`.
pub const LEGACY_COMMENT_NSID: &str = "ovh.plonk.comment";

pub use error::{Error, Result};
pub use event::{AtUri, Collection, Operation, RepoEvent};
pub use record::{
    CommentRecord, PasteRecord, Record, StrongRef, is_comment_record, is_paste_record,
    validate_comment, validate_paste, validate_record, validate_short_url,
};
