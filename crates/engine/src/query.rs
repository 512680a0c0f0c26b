use crate::cache::QuerySignature;
use crate::engine::Engine;
use crate::error::{ErrorKind, Result};
use corpus_index::error::ErrorKind as IndexErrorKind;
use corpus_index::{ByteRange, ChunkSlice};
use exn::{OptionExt, ResultExt};
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tracing::instrument;

/// Chunks read and decompressed concurrently by one query.
const READ_AHEAD: usize = 8;

impl Engine {
    /// The bytes of `range` within `document_id`.
    ///
    /// Returns `None` for unknown documents and for ranges reaching past
    /// the end of the document. Fails with [`ErrorKind::CorruptChunk`]
    /// rather than return bytes that do not match their hash.
    #[instrument(skip(self, range), fields(%range, size, cached))]
    pub async fn query(&self, document_id: &str, range: ByteRange) -> Result<Option<Arc<[u8]>>> {
        if range.start > range.end {
            exn::bail!(ErrorKind::InvalidRange);
        }
        let span = tracing::Span::current();
        let signature = QuerySignature::new(document_id, range);
        if let Some(bytes) = self.cache.get(&signature) {
            span.record("cached", true);
            span.record("size", bytes.len());
            return Ok(Some(bytes));
        }
        span.record("cached", false);

        // Read before the index so a delete racing this lookup keeps its
        // result out of the cache.
        let generation = self.cache.generation();
        let Some(length) = self.index.document_length(document_id).await.map_err(ErrorKind::index)? else {
            return Ok(None);
        };
        if range.end > length {
            return Ok(None);
        }
        if range.is_empty() {
            return Ok(Some(Arc::from(Vec::new())));
        }

        let slices = match self.index.lookup(document_id, range).await {
            Ok(slices) => slices,
            Err(err) if matches!(&*err, IndexErrorKind::Gap { .. }) => {
                // Deleted between the length check and the lookup.
                if self.index.document_length(document_id).await.map_err(ErrorKind::index)?.is_none() {
                    return Ok(None);
                }
                return Err(ErrorKind::index(err));
            },
            Err(err) => return Err(ErrorKind::index(err)),
        };

        let parts: Vec<Vec<u8>> =
            stream::iter(slices.iter().map(|slice| self.read_slice(slice))).buffered(READ_AHEAD).try_collect().await?;
        let mut bytes = Vec::with_capacity(range.len() as usize);
        for part in parts {
            bytes.extend_from_slice(&part);
        }
        let bytes: Arc<[u8]> = Arc::from(bytes);
        span.record("size", bytes.len());
        self.cache.put_since(&signature, bytes.clone(), generation);
        Ok(Some(bytes))
    }

    /// Length of a committed document.
    pub async fn document_length(&self, document_id: &str) -> Result<Option<u64>> {
        self.index.document_length(document_id).await.map_err(ErrorKind::index)
    }

    /// The whole of `document_id`.
    pub async fn query_document(&self, document_id: &str) -> Result<Option<Arc<[u8]>>> {
        match self.document_length(document_id).await? {
            Some(length) => self.query(document_id, ByteRange::new(0, length)).await,
            None => Ok(None),
        }
    }

    /// Remove `document_id` and drop its cached reads. Its chunks lose one
    /// reference each and are kept until purged.
    ///
    /// Returns `false` if there was no such document.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let _doc = self.documents.lock(document_id).await;
        let removed = self.index.remove(document_id).await.map_err(ErrorKind::index)?;
        let evicted = self.cache.invalidate_document(document_id);
        tracing::debug!(removed, evicted, "Deleted document");
        Ok(removed)
    }

    /// Decompressed bytes of one slice, verified against the chunk hash.
    async fn read_slice(&self, slice: &ChunkSlice) -> Result<Vec<u8>> {
        let chunk = &slice.chunk;
        let corrupt = || Some(chunk.hash.to_hex());
        let stored = self
            .store
            .read_expecting(chunk.location, &chunk.hash)
            .await
            .map_err(|err| ErrorKind::storage(err, corrupt()))?;
        let bytes = tokio::task::spawn_blocking(move || stored.into_bytes())
            .await
            .or_raise(|| ErrorKind::Worker)?
            .map_err(|err| ErrorKind::storage(err, corrupt()))?;
        if slice.inner_offset == 0 && slice.inner_length == bytes.len() as u64 {
            return Ok(bytes);
        }
        slice.cut(&bytes).map(<[u8]>::to_vec).ok_or_raise(|| ErrorKind::CorruptChunk(chunk.hash.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::error::ErrorKind;
    use corpus_config::Config;
    use corpus_index::ByteRange;

    async fn engine() -> Engine {
        let mut config = Config::default();
        config.cache.sweep_interval_secs = 0;
        Engine::in_memory(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_document_is_absent() {
        let engine = engine().await;
        assert_eq!(engine.query("missing", ByteRange::new(0, 1)).await.unwrap(), None);
        assert_eq!(engine.query_document("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_out_of_bounds_range_is_absent() {
        let engine = engine().await;
        engine.ingest("doc", b"0123456789").await.unwrap();
        assert_eq!(engine.query("doc", ByteRange::new(5, 11)).await.unwrap(), None);
        assert_eq!(engine.query("doc", ByteRange::new(10, 10)).await.unwrap().as_deref(), Some(&b""[..]));
    }

    #[tokio::test]
    async fn test_inverted_range_is_invalid() {
        let engine = engine().await;
        let err = engine.query("doc", ByteRange::new(4, 2)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRange));
    }

    #[tokio::test]
    async fn test_second_query_hits_cache() {
        let engine = engine().await;
        engine.ingest("doc", b"0123456789").await.unwrap();
        let range = ByteRange::new(2, 6);
        assert_eq!(engine.query("doc", range).await.unwrap().as_deref(), Some(&b"2345"[..]));
        assert_eq!(engine.query("doc", range).await.unwrap().as_deref(), Some(&b"2345"[..]));
        let stats = engine.cache().stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_delete_drops_cached_reads() {
        let engine = engine().await;
        engine.ingest("doc", b"0123456789").await.unwrap();
        engine.query_document("doc").await.unwrap();
        assert_eq!(engine.cache().len(), 1);

        assert!(engine.delete_document("doc").await.unwrap());
        assert!(engine.cache().is_empty());
        assert_eq!(engine.query_document("doc").await.unwrap(), None);
        assert!(!engine.delete_document("doc").await.unwrap());
    }
}
