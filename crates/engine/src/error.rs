//! Engine Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors from the index, store and
//! codec crates are raised as children of an engine kind, so callers match
//! on one enum while the full tree stays available for reporting.

use corpus_index::error::{Error as IndexError, ErrorKind as IndexErrorKind};
use corpus_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The document (or one of its ranges) is already indexed. The write
    /// was rejected; delete the document first to replace it.
    #[display("index conflict for document {_0}")]
    IndexConflict(#[error(not(source))] String),
    /// Stored bytes failed verification. Nothing was returned.
    #[display("corrupt chunk {_0}")]
    CorruptChunk(#[error(not(source))] String),
    /// The chunk container reached its size limit.
    #[display("chunk store is full")]
    StoreFull,
    #[display("invalid range")]
    InvalidRange,
    #[display("engine configuration error")]
    Config,
    #[display("chunk index error")]
    Index,
    #[display("chunk store error")]
    Storage,
    #[display("compression error")]
    Compression,
    /// A blocking worker task panicked or was cancelled.
    #[display("worker task failed")]
    Worker,
}

impl ErrorKind {
    /// Raise an index error under the matching engine kind.
    #[track_caller]
    pub fn index(err: IndexError) -> Error {
        let kind = match &*err {
            IndexErrorKind::Conflict { document_id, .. } | IndexErrorKind::DocumentExists(document_id) => {
                ErrorKind::IndexConflict(document_id.clone())
            },
            IndexErrorKind::InvalidRange(_) => ErrorKind::InvalidRange,
            _ => ErrorKind::Index,
        };
        err.raise(kind)
    }

    /// Raise a storage error under the matching engine kind. `hash` names
    /// the chunk being read, if any.
    #[track_caller]
    pub fn storage(err: StorageError, hash: Option<String>) -> Error {
        let kind = match (&*err, hash) {
            (StorageErrorKind::StoreFull { .. }, _) => ErrorKind::StoreFull,
            (kind, Some(hash)) if kind.is_corruption() => ErrorKind::CorruptChunk(hash),
            (StorageErrorKind::OutOfBounds { .. }, Some(hash)) => ErrorKind::CorruptChunk(hash),
            (StorageErrorKind::Compression(_), None) => ErrorKind::Compression,
            _ => ErrorKind::Storage,
        };
        err.raise(kind)
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Index | Self::Storage | Self::Worker)
    }
}
