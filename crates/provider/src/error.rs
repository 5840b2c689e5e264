//! Provider Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A provider error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The source could not be reached, or answered with a transport-level
    /// failure.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The source answered, but the answer could not be understood.
    #[display("parsing error: {_0}")]
    Parsing(#[error(not(source))] String),
    /// The requested unit, chapter or page does not exist at the source.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The fetch was abandoned because its cancellation token fired.
    #[display("cancelled")]
    Cancelled,
    /// An identifier contains invalid characters or would escape its root.
    #[display("invalid identifier: {_0}")]
    InvalidId(#[error(not(source))] String),
    /// No provider is registered under the requested source identifier.
    #[display("unknown source: {_0}")]
    UnknownSource(#[error(not(source))] String),
    /// Underlying I/O error (local sources).
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_))
    }
}
