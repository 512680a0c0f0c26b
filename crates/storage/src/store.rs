use crate::error::{ErrorKind, Result};
use crate::fingerprint::ChunkHash;
use crate::record::{ChunkLocation, HEADER_LEN, RecordHeader};
use crate::BackendHandle;
use async_stream::stream;
use corpus_compress::Codec;
use futures::{Stream, StreamExt};
use tracing::instrument;

/// Framed chunk records on top of a [`ContainerBackend`](crate::ContainerBackend).
///
/// The store never decides *whether* a chunk should be written; that is the
/// index's job. It only frames, appends, reads back and verifies.
#[derive(Clone)]
pub struct ChunkStore {
    backend: BackendHandle,
    limit: Option<u64>,
}

/// A record read back from the container, not yet decompressed.
#[derive(Clone, Debug)]
pub struct StoredChunk {
    pub location: ChunkLocation,
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl StoredChunk {
    /// Decompress the payload and check it against the header's hash and
    /// length. CPU-bound; callers on an async runtime should run this on a
    /// blocking thread.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let offset = self.location.offset;
        let raw_len = usize::try_from(self.header.raw_len)
            .map_err(|_| ErrorKind::Corrupt { offset, reason: "decompressed length overflows usize" })?;
        let bytes = self.header.codec.decompress_exact(&self.payload, raw_len).map_err(ErrorKind::compression)?;
        if ChunkHash::of(&bytes) != self.header.hash {
            exn::bail!(ErrorKind::Corrupt { offset, reason: "content hash mismatch" });
        }
        Ok(bytes)
    }
}

impl ChunkStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, limit: None }
    }

    /// Refuse appends that would grow the container past `limit` bytes.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Physical size of the container in bytes.
    pub async fn len(&self) -> Result<u64> {
        self.backend.len().await
    }

    /// Frame and append one chunk payload.
    #[instrument(skip(self, hash, payload), fields(store = self.backend.name(), %hash, stored_len = payload.len()))]
    pub async fn append(&self, hash: &ChunkHash, codec: Codec, raw_len: u64, payload: &[u8]) -> Result<ChunkLocation> {
        let header = RecordHeader { codec, raw_len, stored_len: payload.len() as u64, hash: *hash };
        let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
        record.extend_from_slice(&header.encode());
        record.extend_from_slice(payload);
        let offset = self.backend.append(&record, self.limit).await?;
        tracing::trace!(offset, "Appended chunk record");
        Ok(ChunkLocation { offset, length: record.len() as u64 })
    }

    /// Read the record at `location` and check its header.
    pub async fn read(&self, location: ChunkLocation) -> Result<StoredChunk> {
        if location.length < HEADER_LEN as u64 {
            exn::bail!(ErrorKind::Corrupt { offset: location.offset, reason: "record shorter than header" });
        }
        let mut bytes = self.backend.read_at(location.offset, location.length).await?;
        let header = RecordHeader::decode(&bytes, location.offset)?;
        if header.record_len() != location.length {
            exn::bail!(ErrorKind::Corrupt { offset: location.offset, reason: "record length mismatch" });
        }
        let payload = bytes.split_off(HEADER_LEN);
        Ok(StoredChunk { location, header, payload })
    }

    /// Read the record at `location`, also requiring that it frames the
    /// chunk identified by `expected`.
    pub async fn read_expecting(&self, location: ChunkLocation, expected: &ChunkHash) -> Result<StoredChunk> {
        let chunk = self.read(location).await?;
        if chunk.header.hash != *expected {
            exn::bail!(ErrorKind::Corrupt { offset: location.offset, reason: "record belongs to a different chunk" });
        }
        Ok(chunk)
    }

    /// Walk every record header from the start of the container.
    ///
    /// The walk stops at the first unreadable header: without a valid
    /// length there is no way to find the next record.
    pub fn records(&self) -> impl Stream<Item = Result<(ChunkLocation, RecordHeader)>> + Send + '_ {
        stream! {
            let end = match self.backend.len().await {
                Ok(end) => end,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            let mut offset = 0u64;
            while offset < end {
                let available = (end - offset).min(HEADER_LEN as u64);
                let header = match self.backend.read_at(offset, available).await {
                    Ok(bytes) => RecordHeader::decode(&bytes, offset),
                    Err(err) => Err(err),
                };
                match header {
                    Ok(header) if offset + header.record_len() <= end => {
                        let location = ChunkLocation { offset, length: header.record_len() };
                        offset = location.end();
                        yield Ok((location, header));
                    },
                    Ok(_) => {
                        yield Err(exn::Exn::from(ErrorKind::Corrupt { offset, reason: "record extends past end of container" }));
                        return;
                    },
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                }
            }
        }
    }

    /// End of the last record reachable by walking from the start of the
    /// container. Equals [`len`](Self::len) unless the tail is unreadable.
    pub async fn readable_len(&self) -> Result<u64> {
        let mut end = 0;
        let mut records = std::pin::pin!(self.records());
        while let Some(item) = records.next().await {
            match item {
                Ok((location, _)) => end = location.end(),
                Err(err) if err.is_corruption() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(end)
    }

    /// Drop every container byte past `len`.
    #[instrument(skip(self), fields(store = self.backend.name()))]
    pub async fn truncate(&self, len: u64) -> Result<()> {
        self.backend.truncate(len).await
    }

    pub async fn sync(&self) -> Result<()> {
        self.backend.sync().await
    }
}
