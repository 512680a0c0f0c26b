//! In-memory container backend.

use super::{check_bounds, check_capacity};
use crate::ContainerBackend;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-memory container for tests and ephemeral engines.
///
/// The bytes live in a `Vec` behind a [`RwLock`], so appends take the write
/// half and reads share the read half.
pub struct MemoryBackend {
    name: String,
    bytes: RwLock<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), bytes: RwLock::new(Vec::new()) }
    }

    /// Overwrite committed bytes in place. Only useful for simulating
    /// on-disk corruption in tests.
    #[doc(hidden)]
    pub async fn corrupt_at(&self, offset: usize, mask: u8) {
        let mut bytes = self.bytes.write().await;
        if let Some(byte) = bytes.get_mut(offset) {
            *byte ^= mask;
        }
    }
}

#[async_trait]
impl ContainerBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.bytes.read().await.len() as u64)
    }

    async fn append(&self, data: &[u8], limit: Option<u64>) -> Result<u64> {
        let mut bytes = self.bytes.write().await;
        let offset = bytes.len() as u64;
        check_capacity(offset, data.len(), limit)?;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    async fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let bytes = self.bytes.read().await;
        check_bounds(offset, len, bytes.len() as u64)?;
        let (start, end) = (offset as usize, (offset + len) as usize);
        Ok(bytes[start..end].to_vec())
    }

    async fn truncate(&self, len: u64) -> Result<()> {
        let mut bytes = self.bytes.write().await;
        bytes.truncate(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_append_returns_offsets() {
        let backend = MemoryBackend::new("test");
        assert!(backend.is_empty().await.unwrap());
        assert_eq!(backend.append(b"abc", None).await.unwrap(), 0);
        assert_eq!(backend.append(b"defg", None).await.unwrap(), 3);
        assert_eq!(backend.len().await.unwrap(), 7);
        assert_eq!(backend.read_at(2, 3).await.unwrap(), b"cde");
    }

    #[tokio::test]
    async fn test_full_container_is_unchanged() {
        let backend = MemoryBackend::new("test");
        backend.append(b"12345", Some(8)).await.unwrap();
        let err = backend.append(b"6789", Some(8)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StoreFull { limit: 8 }));
        assert_eq!(backend.len().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_read_past_end() {
        let backend = MemoryBackend::new("test");
        backend.append(b"abc", None).await.unwrap();
        let err = backend.read_at(1, 3).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::OutOfBounds { offset: 1, len: 3 }));
    }

    #[tokio::test]
    async fn test_truncate() {
        let backend = MemoryBackend::new("test");
        backend.append(b"keep-drop", None).await.unwrap();
        backend.truncate(20).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 9);
        backend.truncate(4).await.unwrap();
        assert_eq!(backend.append(b"!", None).await.unwrap(), 4);
        assert_eq!(backend.read_at(0, 5).await.unwrap(), b"keep!");
    }

    #[tokio::test]
    async fn test_corrupt_at_flips_bits() {
        let backend = MemoryBackend::new("test");
        backend.append(&[0b0000_0000], None).await.unwrap();
        backend.corrupt_at(0, 0b1000_0001).await;
        assert_eq!(backend.read_at(0, 1).await.unwrap(), vec![0b1000_0001]);
    }
}
