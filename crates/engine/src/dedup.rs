//! Store-or-skip decisions for candidate chunks.

use crate::error::{ErrorKind, Result};
use crate::stripes::Stripes;
use corpus_compress::{Compressed, compress};
use corpus_index::{ChunkRecord, NewChunk, Repository};
use corpus_storage::fingerprint::fast_digest;
use corpus_storage::{ChunkHash, ChunkStore};
use exn::ResultExt;
use tracing::instrument;

/// Outcome of [`Deduplicator::put_candidate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Whether this call stored the chunk.
    pub is_new: bool,
    pub chunk: ChunkRecord,
}

pub(crate) struct Deduplicator {
    index: Repository,
    store: ChunkStore,
    buckets: Stripes,
}

impl Deduplicator {
    pub(crate) fn new(index: Repository, store: ChunkStore, stripes: usize) -> Self {
        Self { index, store, buckets: Stripes::new(stripes) }
    }

    /// Take one reference to the chunk holding `bytes`, storing it first if
    /// no chunk with the same content exists.
    ///
    /// The lookup, the append and the insert all happen under the lock of
    /// the fast digest's bucket, so concurrent callers with the same bytes
    /// store them once.
    #[instrument(skip(self, bytes), fields(size = bytes.len(), fast_digest, is_new))]
    pub(crate) async fn put_candidate(&self, bytes: Vec<u8>) -> Result<Candidate> {
        let span = tracing::Span::current();
        let fast = fast_digest(&bytes);
        span.record("fast_digest", fast);
        let _bucket = self.buckets.lock(&fast).await;

        let bucket = self.index.find_by_fast_digest(fast).await.map_err(ErrorKind::index)?;
        let strong = ChunkHash::of(&bytes);
        if let Some(existing) = bucket.into_iter().find(|chunk| chunk.hash == strong) {
            let ref_count = self.index.acquire(&strong).await.map_err(ErrorKind::index)?;
            span.record("is_new", false);
            return Ok(Candidate { is_new: false, chunk: ChunkRecord { ref_count, ..existing } });
        }

        let raw_len = bytes.len() as u64;
        let Compressed { codec, payload } =
            tokio::task::spawn_blocking(move || compress(&bytes)).await.or_raise(|| ErrorKind::Worker)?;
        let location =
            self.store.append(&strong, codec, raw_len, &payload).await.map_err(|err| ErrorKind::storage(err, None))?;
        let new = NewChunk { hash: strong, fast_digest: fast, codec, raw_len, stored_len: payload.len() as u64, location };
        match self.index.insert_chunk(&new).await {
            Ok(chunk) => {
                span.record("is_new", true);
                Ok(Candidate { is_new: true, chunk })
            },
            Err(err) => {
                tracing::warn!(
                    offset = location.offset,
                    length = location.length,
                    hash = %strong,
                    "Chunk record appended but not indexed; container bytes are dead"
                );
                Err(ErrorKind::index(err))
            },
        }
    }

    /// Delete the index row of an unreferenced chunk. Returns `false` if
    /// the chunk gained a reference in the meantime.
    pub(crate) async fn purge(&self, orphan: &ChunkRecord) -> Result<bool> {
        let _bucket = self.buckets.lock(&orphan.fast_digest).await;
        self.index.delete_orphan(&orphan.hash).await.map_err(ErrorKind::index)
    }
}
