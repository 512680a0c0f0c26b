use crate::engine::Engine;
use crate::error::{ErrorKind, Result};
use corpus_index::ByteRange;
use corpus_storage::ChunkHash;
use tracing::instrument;

/// One chunk reference created by an ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestedChunk {
    pub hash: ChunkHash,
    /// Where the chunk sits in the document.
    pub range: ByteRange,
    /// Whether the chunk was stored by this ingest.
    pub is_new: bool,
    /// Compressed payload length, record header excluded.
    pub stored_len: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub chunks: Vec<IngestedChunk>,
    /// Compressed payload bytes newly written to the container.
    pub bytes_stored: u64,
    /// Raw length minus `bytes_stored`.
    pub bytes_saved: u64,
}

impl Engine {
    /// Chunk, deduplicate and index `data` as `document_id`.
    ///
    /// Fails with [`ErrorKind::IndexConflict`] if the document already
    /// exists. Nothing becomes visible to queries until the whole document
    /// is indexed.
    #[instrument(skip(self, data), fields(size = data.len(), chunks, bytes_stored))]
    pub async fn ingest(&self, document_id: &str, data: &[u8]) -> Result<IngestReport> {
        let _doc = self.documents.lock(document_id).await;
        if self.index.document_length(document_id).await.map_err(ErrorKind::index)?.is_some() {
            exn::bail!(ErrorKind::IndexConflict(document_id.to_string()));
        }
        // Ranges of an ingest that was cancelled before it committed.
        if self.index.remove(document_id).await.map_err(ErrorKind::index)? {
            tracing::debug!("Discarded leftovers of an interrupted ingest");
        }

        let report = match self.ingest_chunks(document_id, data).await {
            Ok(report) => report,
            Err(err) => {
                if let Err(cleanup) = self.index.remove(document_id).await {
                    tracing::warn!(error = %cleanup, "Could not discard partial ingest; recovery will");
                }
                return Err(err);
            },
        };

        let span = tracing::Span::current();
        span.record("chunks", report.chunks.len());
        span.record("bytes_stored", report.bytes_stored);
        Ok(report)
    }

    async fn ingest_chunks(&self, document_id: &str, data: &[u8]) -> Result<IngestReport> {
        let ranges = self.chunker.split(data);
        let mut report = IngestReport { chunks: Vec::with_capacity(ranges.len()), ..IngestReport::default() };
        for range in ranges {
            // Chunk bounds never exceed the input length.
            let bytes = data[range.start as usize..range.end as usize].to_vec();
            let candidate = self.dedup.put_candidate(bytes).await?;
            let chunk = candidate.chunk;
            if let Err(err) = self.index.record(document_id, range, &chunk.hash, 0).await {
                if let Err(release) = self.index.release(&chunk.hash).await {
                    tracing::warn!(hash = %chunk.hash, error = %release, "Could not release chunk reference");
                }
                return Err(ErrorKind::index(err));
            }
            if candidate.is_new {
                report.bytes_stored += chunk.stored_len;
            }
            report.chunks.push(IngestedChunk {
                hash: chunk.hash,
                range,
                is_new: candidate.is_new,
                stored_len: chunk.stored_len,
            });
        }
        let length = data.len() as u64;
        self.index.commit_document(document_id, length).await.map_err(ErrorKind::index)?;
        // A previous document under this id may still have cached reads.
        self.cache.invalidate_document(document_id);
        report.bytes_saved = length.saturating_sub(report.bytes_stored);
        Ok(report)
    }
}
