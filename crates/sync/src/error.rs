//! Sync Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. [`ErrorKind`] doubles as the error
//! taxonomy published to observers, which is why it's `Clone` and only
//! carries strings.

use derive_more::{Display, Error};
use tanko_cache::error::Error as StoreError;
use tanko_provider::error::{Error as ProviderError, ErrorKind as ProviderErrorKind};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing error categories, each with a human-readable detail.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The content source could not be reached.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The content source answered with something that couldn't be understood.
    #[display("parsing error: {_0}")]
    Parsing(#[error(not(source))] String),
    /// Reading from or saving to the local store failed.
    #[display("store error: {_0}")]
    Store(#[error(not(source))] String),
    /// The operation was superseded. Never shown to users.
    #[display("cancelled: {_0}")]
    Cancelled(#[error(not(source))] String),
    /// Something that should not fail, did (local I/O, mostly).
    #[display("unexpected error: {_0}")]
    Unexpected(#[error(not(source))] String),
    #[display("{_0}")]
    Other(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Store(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Classify a provider failure, keeping it in the error tree.
    #[track_caller]
    pub(crate) fn provider(err: ProviderError) -> Error {
        let kind = match &*err {
            ProviderErrorKind::Network(detail) => Self::Network(detail.clone()),
            ProviderErrorKind::Parsing(detail) => Self::Parsing(detail.clone()),
            ProviderErrorKind::Cancelled => Self::Cancelled("source fetch cancelled".to_string()),
            ProviderErrorKind::Io(io) => Self::Unexpected(io.to_string()),
            other => Self::Other(other.to_string()),
        };
        err.raise(kind)
    }

    /// Classify a store failure, keeping it in the error tree.
    #[track_caller]
    pub(crate) fn store(err: StoreError) -> Error {
        let kind = Self::Store((*err).to_string());
        err.raise(kind)
    }
}
