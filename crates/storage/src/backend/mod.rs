//! Container backend trait and implementations.
//!
//! A container is a single append-only byte sequence. Backends only know
//! about bytes and offsets; record framing lives in [`crate::record`].

mod local;
mod memory;

pub use self::local::LocalBackend;
pub use self::memory::MemoryBackend;
use crate::error::Result;
use async_trait::async_trait;

/// Unified interface for chunk containers.
///
/// # Concurrency
/// Appends are serialized by the backend and a failed append leaves the
/// container at its previous length. Reads of already-committed bytes never
/// wait on an in-progress append.
///
/// # Examples
///
/// ```
/// use corpus_storage::backend::{ContainerBackend, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::new("scratch");
/// let first = backend.append(b"hello ", None).await?;
/// let second = backend.append(b"world", None).await?;
/// assert_eq!((first, second), (0, 6));
/// assert_eq!(backend.read_at(second, 5).await?, b"world");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Number of committed bytes.
    async fn len(&self) -> Result<u64>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Append `data` and return the offset it was written at.
    ///
    /// When `limit` is set and the container would grow beyond it, nothing
    /// is written and [`StoreFull`](crate::error::ErrorKind::StoreFull) is
    /// returned.
    async fn append(&self, data: &[u8], limit: Option<u64>) -> Result<u64>;

    /// Read exactly `len` committed bytes starting at `offset`.
    async fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Discard every committed byte past `len`. A no-op if the container
    /// is not longer than `len`.
    async fn truncate(&self, len: u64) -> Result<()>;

    /// Flush committed bytes to durable storage.
    async fn sync(&self) -> Result<()>;
}

/// Shared bounds check for `read_at` implementations.
pub(crate) fn check_bounds(offset: u64, len: u64, committed: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= committed => Ok(()),
        _ => exn::bail!(crate::error::ErrorKind::OutOfBounds { offset, len }),
    }
}

/// Shared capacity check for `append` implementations.
pub(crate) fn check_capacity(current: u64, additional: usize, limit: Option<u64>) -> Result<()> {
    if let Some(limit) = limit
        && current.saturating_add(additional as u64) > limit
    {
        exn::bail!(crate::error::ErrorKind::StoreFull { limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_bounds() {
        assert!(check_bounds(0, 10, 10).is_ok());
        assert!(check_bounds(10, 0, 10).is_ok());
        assert!(matches!(&*check_bounds(5, 6, 10).unwrap_err(), ErrorKind::OutOfBounds { offset: 5, len: 6 }));
        assert!(check_bounds(u64::MAX, 2, 10).is_err());
    }

    #[test]
    fn test_capacity() {
        assert!(check_capacity(90, 10, Some(100)).is_ok());
        assert!(check_capacity(u64::MAX, 10, None).is_ok());
        assert!(matches!(&*check_capacity(91, 10, Some(100)).unwrap_err(), ErrorKind::StoreFull { limit: 100 }));
    }
}
