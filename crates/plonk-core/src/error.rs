//! Error types for record and event handling.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or validating records and events.
#[derive(Error, Debug)]
pub enum Error {
    /// The payload is not shaped like the expected record (`$type` mismatch,
    /// not an object, ...).
    #[error("not a {expected} record: {reason}")]
    WrongShape {
        /// NSID the payload was checked against.
        expected: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has an invalid type or value.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// The event names a collection this application does not handle.
    #[error("unrecognized collection '{0}'")]
    UnknownCollection(String),

    /// Malformed `at://` URI.
    #[error("invalid AT URI '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
