//! Index Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::ByteRange;
use derive_more::{Display, Error};

/// An index error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A range would overlap an existing range of the same document.
    #[display("range {range} of document {document_id} overlaps an existing range")]
    Conflict {
        #[error(not(source))]
        document_id: String,
        #[error(not(source))]
        range: ByteRange,
    },
    /// A committed document with this id already exists.
    #[display("document already exists: {_0}")]
    DocumentExists(#[error(not(source))] String),
    /// Empty range, or a slice that does not fit inside its chunk.
    #[display("invalid range: {_0}")]
    InvalidRange(#[error(not(source))] ByteRange),
    #[display("chunk not found: {_0}")]
    ChunkNotFound(#[error(not(source))] String),
    /// The stored ranges of a document do not tile the requested range.
    #[display("document {document_id} has no range covering offset {offset}")]
    Gap {
        #[error(not(source))]
        document_id: String,
        offset: u64,
    },
    /// A stored value could not be converted to or from its column type.
    #[display("invalid index data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ErrorKind::Conflict { document_id: "doc3".to_string(), range: ByteRange::new(5, 15) };
        assert_eq!(err.to_string(), "range [5, 15) of document doc3 overlaps an existing range");
        let err = ErrorKind::Gap { document_id: "doc".to_string(), offset: 7 };
        assert_eq!(err.to_string(), "document doc has no range covering offset 7");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::DocumentExists("doc".to_string()).is_retryable());
    }
}
