//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use corpus_compress::error::{Error as CompressionError, ErrorKind as CompressionErrorKind};
use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Container file does not exist
    #[display("container not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Container path is not usable (relative, or a directory)
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Read outside of the committed container bytes
    #[display("read of {len} bytes at offset {offset} is out of bounds")]
    OutOfBounds { offset: u64, len: u64 },
    /// A chunk record failed verification. Never retry; the bytes are wrong.
    #[display("corrupt chunk record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: &'static str },
    /// The container has reached its configured size limit.
    #[display("chunk store is full (limit {limit} bytes)")]
    StoreFull { limit: u64 },
    /// A chunk hash string could not be parsed
    #[display("invalid chunk hash: {_0}")]
    InvalidHash(#[error(not(source))] String),
    /// Compression/decompression error
    #[display("compression error: {_0}")]
    Compression(CompressionErrorKind),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
impl ErrorKind {
    /// Convert a compression error into a storage error, preserving the
    /// compress crate's `Exn` frame (error tree) as a child in its own
    /// error tree.
    #[track_caller]
    pub fn compression(err: CompressionError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Compression(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Whether the error means stored bytes cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::Compression(_))
    }
}
