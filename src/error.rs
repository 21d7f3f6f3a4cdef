//! Error types for databroker
//!
//! Every failure is surfaced to the caller. Nothing is retried or swallowed
//! internally; messages say what was wrong and what to do about it.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by user-supplied transforms and writers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Databroker error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed key, invalid range bounds, absent or ambiguous identifier
    #[error("Invalid input: {0}")]
    Validation(String),

    /// No run matched an otherwise well-formed lookup
    #[error("Not found: {0}")]
    NotFound(String),

    /// Asked for the n-th most recent run but fewer runs exist
    #[error("Run index out of range: asked for run -{requested}, but there are only {available} runs.")]
    OutOfRange {
        /// Distance into the past that was requested (1-indexed)
        requested: usize,
        /// Number of runs actually available
        available: usize,
    },

    /// Document received out of Start -> Descriptor -> Event -> Stop order
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The per-event transform failed
    #[error("Transform failed on field '{field}': {source}")]
    Transform {
        /// Data key whose value could not be transformed
        field: String,
        /// Error raised by the transform
        #[source]
        source: BoxError,
    },

    /// Metadata or blob store collaborator failed
    #[error("Store error: {0}")]
    Store(String),

    /// External writer failed to write or close
    #[error("Writer error on field '{field}': {source}")]
    Writer {
        /// Data key the writer was handling
        field: String,
        /// Error raised by the writer
        #[source]
        source: BoxError,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a transform failure for `field`.
    pub fn transform(field: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transform {
            field: field.into(),
            source: source.into(),
        }
    }

    /// Wrap a writer failure for `field`.
    pub fn writer(field: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Writer {
            field: field.into(),
            source: source.into(),
        }
    }
}
