//! Error taxonomy for sediment.
//!
//! Structural errors (`Parameter`, `Schema`, `Query`) reject the offending
//! call before any I/O. `Validation` and `Io` raised while indexing an
//! individual file are caught by the indexer, logged, surfaced as a
//! [`ValidationFailed`](crate::Event::ValidationFailed) event, and do not
//! abort the rest of the pass.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad call arguments, rejected before any I/O.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Invalid table or index definition.
    #[error("schema error: {0}")]
    Schema(String),

    /// Structurally invalid query, or a write against a non-writable or
    /// unknown source.
    #[error("query error: {0}")]
    Query(String),

    /// A file's content failed to parse or failed the table's validate step.
    #[error("validation error: {0}")]
    Validation(String),

    /// Store lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Source read/write/history failure, or a backend storage failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// The database has been closed.
    #[error("database has been closed")]
    Closed,
}

impl Error {
    pub(crate) fn parameter(msg: impl Into<String>) -> Self {
        Error::Parameter(msg.into())
    }

    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub(crate) fn query(msg: impl Into<String>) -> Self {
        Error::Query(msg.into())
    }

    pub(crate) fn io(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }

    /// True when the error is a store or source lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(err.to_string())
    }
}
