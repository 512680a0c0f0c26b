//! Local filesystem container backend.
//!
//! The container is one regular file written in append mode via `tokio::fs`.
//! Each read opens its own handle so readers never contend with the writer.

use super::{check_bounds, check_capacity};
use crate::ContainerBackend;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

struct Writer {
    file: File,
    /// Length of the file as far as successful appends are concerned.
    len: u64,
    /// Set while an append is in flight; a dropped append future leaves it
    /// set so the next append truncates the partial write.
    dirty: bool,
}

/// Local filesystem container backend.
///
/// # Examples
///
/// ```no_run
/// use corpus_storage::backend::LocalBackend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::open("local", "/var/lib/corpus/chunks.pack").await?;
/// # Ok(())
/// # }
/// ```
pub struct LocalBackend {
    name: String,
    path: PathBuf,
    sync_writes: bool,
    /// Bytes visible to readers. Only advanced after a complete append.
    committed: AtomicU64,
    writer: Mutex<Writer>,
}

impl LocalBackend {
    /// Open (or create) the container file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, points at a directory,
    /// or cannot be opened for appending.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_absolute() || path.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(path));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Self::map_io_error(e, &path))?;
        let len = file.metadata().await.map_err(ErrorKind::Io)?.len();
        tracing::debug!(path = %path.display(), len, "Opened chunk container");
        Ok(Self {
            name: name.into(),
            path,
            sync_writes: false,
            committed: AtomicU64::new(len),
            writer: Mutex::new(Writer { file, len, dirty: false }),
        })
    }

    /// Call `fdatasync` after every append.
    #[must_use]
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn write(&self, file: &mut File, data: &[u8]) -> std::io::Result<()> {
        file.write_all(data).await?;
        file.flush().await?;
        if self.sync_writes {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.committed.load(Ordering::Acquire))
    }

    #[tracing::instrument(level = "trace", skip(self, data), fields(container = %self.name, size = data.len()))]
    async fn append(&self, data: &[u8], limit: Option<u64>) -> Result<u64> {
        let mut writer = self.writer.lock().await;
        let offset = writer.len;
        if writer.dirty {
            tracing::warn!(container = %self.name, offset, "Discarding partial append");
            writer.file.set_len(offset).await.map_err(ErrorKind::Io)?;
            writer.dirty = false;
        }
        check_capacity(offset, data.len(), limit)?;

        writer.dirty = true;
        if let Err(err) = self.write(&mut writer.file, data).await {
            if let Err(rollback) = writer.file.set_len(offset).await {
                tracing::error!(container = %self.name, offset, error = %rollback, "Failed to roll back partial append");
            } else {
                writer.dirty = false;
            }
            exn::bail!(ErrorKind::Io(err));
        }
        writer.dirty = false;
        writer.len = offset + data.len() as u64;
        self.committed.store(writer.len, Ordering::Release);
        Ok(offset)
    }

    async fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        check_bounds(offset, len, self.committed.load(Ordering::Acquire))?;
        let mut file = File::open(&self.path).await.map_err(|e| Self::map_io_error(e, &self.path))?;
        file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        let mut buffer = vec![0u8; len as usize];
        match file.read_exact(&mut buffer).await {
            Ok(_) => Ok(buffer),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                exn::bail!(ErrorKind::OutOfBounds { offset, len })
            },
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        }
    }

    async fn truncate(&self, len: u64) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if len >= writer.len && !writer.dirty {
            return Ok(());
        }
        let len = len.min(writer.len);
        writer.file.set_len(len).await.map_err(ErrorKind::Io)?;
        writer.dirty = false;
        writer.len = len;
        self.committed.store(len, Ordering::Release);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        let writer = self.writer.lock().await;
        writer.file.sync_all().await.map_err(ErrorKind::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::open("test", dir.path().join("nested/chunks.pack")).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_relative_path_rejected() {
        let result = LocalBackend::open("test", "relative/chunks.pack").await;
        assert!(matches!(&*result.err().unwrap(), ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_directory_path_rejected() {
        let dir = TempDir::new().unwrap();
        let result = LocalBackend::open("test", dir.path()).await;
        assert!(matches!(&*result.err().unwrap(), ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let (_dir, backend) = setup().await;
        assert_eq!(backend.append(b"first", None).await.unwrap(), 0);
        assert_eq!(backend.append(b"second", None).await.unwrap(), 5);
        assert_eq!(backend.len().await.unwrap(), 11);
        assert_eq!(backend.read_at(5, 6).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_reopen_preserves_length() {
        let (dir, backend) = setup().await;
        backend.append(b"persisted", None).await.unwrap();
        backend.sync().await.unwrap();
        drop(backend);

        let reopened = LocalBackend::open("test", dir.path().join("nested/chunks.pack")).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 9);
        assert_eq!(reopened.append(b"!", None).await.unwrap(), 9);
        assert_eq!(reopened.read_at(0, 10).await.unwrap(), b"persisted!");
    }

    #[tokio::test]
    async fn test_interrupted_append_is_discarded() {
        let (dir, backend) = setup().await;
        backend.append(b"persisted", None).await.unwrap();
        // What a dropped append future leaves behind: bytes on disk, the
        // writer still marked dirty.
        {
            let mut writer = backend.writer.lock().await;
            writer.dirty = true;
            writer.file.write_all(b"partial").await.unwrap();
            writer.file.flush().await.unwrap();
        }
        let path = dir.path().join("nested/chunks.pack");
        assert_eq!(fs::metadata(&path).await.unwrap().len(), 16);
        assert_eq!(backend.len().await.unwrap(), 9);
        assert!(matches!(&*backend.read_at(9, 7).await.unwrap_err(), ErrorKind::OutOfBounds { offset: 9, len: 7 }));

        assert_eq!(backend.append(b"next", None).await.unwrap(), 9);
        assert_eq!(backend.read_at(0, 13).await.unwrap(), b"persistednext");
        assert_eq!(fs::metadata(&path).await.unwrap().len(), 13);
    }

    #[tokio::test]
    async fn test_truncate_shrinks_committed_length() {
        let (dir, backend) = setup().await;
        backend.append(b"good-torn", None).await.unwrap();
        backend.truncate(100).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 9);

        backend.truncate(4).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 4);
        assert_eq!(backend.append(b"!", None).await.unwrap(), 4);
        drop(backend);

        let reopened = LocalBackend::open("test", dir.path().join("nested/chunks.pack")).await.unwrap();
        assert_eq!(reopened.read_at(0, 5).await.unwrap(), b"good!");
    }

    #[tokio::test]
    async fn test_limit_is_enforced() {
        let (_dir, backend) = setup().await;
        backend.append(&[0u8; 10], Some(16)).await.unwrap();
        let err = backend.append(&[0u8; 10], Some(16)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StoreFull { limit: 16 }));
        assert_eq!(backend.len().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_read_beyond_committed() {
        let (_dir, backend) = setup().await;
        backend.append(b"abc", None).await.unwrap();
        let err = backend.read_at(0, 4).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::OutOfBounds { offset: 0, len: 4 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_do_not_interleave() {
        let (_dir, backend) = setup().await;
        let backend = std::sync::Arc::new(backend);
        let handles: Vec<_> = (0u8..16)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move { (i, backend.append(&[i; 100], None).await.unwrap()) })
            })
            .collect();
        for handle in handles {
            let (i, offset) = handle.await.unwrap();
            assert_eq!(backend.read_at(offset, 100).await.unwrap(), vec![i; 100]);
        }
        assert_eq!(backend.len().await.unwrap(), 1600);
    }
}
