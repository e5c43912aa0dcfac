//! Error types for the cache and ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion, allocation and publishing.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database error with context (open, schema, pragma).
    #[error("Database error: {0}")]
    Database(String),

    /// Another paste already holds this short URL.
    #[error("Short URL '{0}' is already taken")]
    ShortUrlTaken(String),

    /// The allocator could not find a free short URL.
    #[error("Short URL space exhausted after {attempts} attempts (length {length})")]
    ShortUrlExhausted {
        /// Attempts made before giving up.
        attempts: usize,
        /// Length reached when giving up.
        length: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or event validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] plonk_core::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Remote repository write failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Ingestion consumer failure (thread panic, source setup).
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a uniqueness collision the caller may retry.
    pub fn is_retriable_collision(&self) -> bool {
        matches!(self, Self::ShortUrlTaken(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_url_taken_is_retriable() {
        assert!(Error::ShortUrlTaken("ab".to_string()).is_retriable_collision());
        assert!(!Error::Database("locked".to_string()).is_retriable_collision());
    }

    #[test]
    fn test_exhausted_display() {
        let err = Error::ShortUrlExhausted {
            attempts: 12,
            length: 16,
        };
        let msg = err.to_string();
        assert!(msg.contains("12 attempts"));
        assert!(msg.contains("length 16"));
    }

    #[test]
    fn test_from_core_error() {
        let err: Error = plonk_core::Error::MissingField("code").into();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("code"));
    }
}
