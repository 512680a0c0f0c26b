//! Repository over the chunk catalogue, document ranges and documents.
//!
//! Reference counts are owned by the deduplication path: [`acquire`] is
//! called once per logical reference, [`record`] only stores the range. The
//! two are brought back in line by [`recover`] should an ingest be
//! interrupted between them.
//!
//! [`acquire`]: Repository::acquire
//! [`record`]: Repository::record
//! [`recover`]: Repository::recover

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    ByteRange, ChunkRecord, ChunkRow, ChunkSlice, IndexStats, NewChunk, RecoveryReport, SliceRow, StatsRow, to_i64,
};
use corpus_storage::{ChunkHash, FastDigest};
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use time::UtcDateTime;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl Repository {
    // =========================================================================
    // Chunks
    // =========================================================================

    /// All chunks in the bucket of `fast_digest`. Usually zero or one.
    pub async fn find_by_fast_digest(&self, fast_digest: FastDigest) -> Result<Vec<ChunkRecord>> {
        let rows: Vec<ChunkRow> = sqlx::query_as(include_str!("../queries/find_by_fast_digest.sql"))
            .bind(i64::from(fast_digest))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ChunkRecord::try_from).collect()
    }

    pub async fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<ChunkRecord>> {
        let row: Option<ChunkRow> = sqlx::query_as(include_str!("../queries/get_chunk.sql"))
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ChunkRecord::try_from).transpose()
    }

    /// Register a freshly stored chunk with a reference count of one.
    pub async fn insert_chunk(&self, chunk: &NewChunk) -> Result<ChunkRecord> {
        let created_at = UtcDateTime::now();
        let row = ChunkRow::try_from((chunk, created_at))?;
        sqlx::query(include_str!("../queries/insert_chunk.sql"))
            .bind(&row.hash)
            .bind(row.fast_digest)
            .bind(&row.codec)
            .bind(row.raw_length)
            .bind(row.stored_length)
            .bind(row.store_offset)
            .bind(row.record_length)
            .bind(row.created_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        ChunkRecord::try_from(row)
    }

    /// Add one reference to an existing chunk; returns the new count.
    pub async fn acquire(&self, hash: &ChunkHash) -> Result<u64> {
        self.adjust(include_str!("../queries/acquire_chunk.sql"), hash).await
    }

    /// Drop one reference from a chunk; returns the new count. Never goes
    /// below zero.
    pub async fn release(&self, hash: &ChunkHash) -> Result<u64> {
        self.adjust(include_str!("../queries/release_chunk.sql"), hash).await
    }

    async fn adjust(&self, query: &'static str, hash: &ChunkHash) -> Result<u64> {
        let hex = hash.to_hex();
        let count: Option<i64> = sqlx::query_scalar(query)
            .bind(&hex)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let count = count.ok_or_raise(|| ErrorKind::ChunkNotFound(hex))?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("reference count"))
    }

    /// Chunks no range refers to any more, in container order.
    pub async fn list_orphans(&self) -> Result<Vec<ChunkRecord>> {
        let rows: Vec<ChunkRow> = sqlx::query_as(include_str!("../queries/list_orphans.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ChunkRecord::try_from).collect()
    }

    /// Delete a chunk row if, and only if, it is still unreferenced.
    pub async fn delete_orphan(&self, hash: &ChunkHash) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_orphan.sql"))
            .bind(hash.to_hex())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// End of the furthest container record any chunk row points at.
    pub async fn indexed_end(&self) -> Result<u64> {
        let end: i64 = sqlx::query_scalar(include_str!("../queries/indexed_end.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(end).or_raise(|| ErrorKind::InvalidData("indexed end"))
    }

    // =========================================================================
    // Ranges & documents
    // =========================================================================

    /// Map `range` of `document_id` to the chunk slice starting at
    /// `inner_offset` of chunk `hash`.
    ///
    /// The overlap check and the insert are one statement, so two writers
    /// can't both claim the same bytes.
    pub async fn record(&self, document_id: &str, range: ByteRange, hash: &ChunkHash, inner_offset: u64) -> Result<()> {
        if range.is_empty() {
            exn::bail!(ErrorKind::InvalidRange(range));
        }
        let start = to_i64(range.start, "range start")?;
        let end = to_i64(range.end, "range end")?;
        let inner = to_i64(inner_offset, "inner offset")?;
        let result = sqlx::query(include_str!("../queries/record_range.sql"))
            .bind(document_id)
            .bind(start)
            .bind(end)
            .bind(hash.to_hex())
            .bind(inner)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing was inserted: work out which precondition failed.
        let overlapping: i64 = sqlx::query_scalar(include_str!("../queries/count_overlapping_ranges.sql"))
            .bind(document_id)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if overlapping > 0 {
            exn::bail!(ErrorKind::Conflict { document_id: document_id.to_string(), range });
        }
        match self.get_chunk(hash).await? {
            Some(_) => exn::bail!(ErrorKind::InvalidRange(range)),
            None => exn::bail!(ErrorKind::ChunkNotFound(hash.to_hex())),
        }
    }

    /// Make a fully recorded document visible to queries.
    pub async fn commit_document(&self, document_id: &str, length: u64) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/commit_document.sql"))
            .bind(document_id)
            .bind(to_i64(length, "document length")?)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::DocumentExists(document_id.to_string()));
        }
        Ok(())
    }

    /// Length of a committed document, `None` if it isn't committed.
    pub async fn document_length(&self, document_id: &str) -> Result<Option<u64>> {
        let length: Option<i64> = sqlx::query_scalar(include_str!("../queries/document_length.sql"))
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        length.map(|l| u64::try_from(l).or_raise(|| ErrorKind::InvalidData("document length"))).transpose()
    }

    /// The chunk slices covering `range`, in ascending document order.
    ///
    /// Fails with [`ErrorKind::Gap`] unless the slices tile `range` exactly;
    /// callers should bound `range` by the document length first.
    pub async fn lookup(&self, document_id: &str, range: ByteRange) -> Result<Vec<ChunkSlice>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<SliceRow> = sqlx::query_as(include_str!("../queries/lookup_ranges.sql"))
            .bind(document_id)
            .bind(to_i64(range.start, "range start")?)
            .bind(to_i64(range.end, "range end")?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;

        let mut cursor = range.start;
        let mut slices = Vec::with_capacity(rows.len());
        for row in rows {
            let slice = row.clip(range)?;
            if slice.range.start != cursor {
                exn::bail!(ErrorKind::Gap { document_id: document_id.to_string(), offset: cursor });
            }
            cursor = slice.range.end;
            slices.push(slice);
        }
        if cursor != range.end {
            exn::bail!(ErrorKind::Gap { document_id: document_id.to_string(), offset: cursor });
        }
        Ok(slices)
    }

    /// Release every chunk reference held by `document_id` and delete its
    /// ranges and document row. Works on uncommitted leftovers too.
    ///
    /// Returns whether there was anything to remove.
    #[instrument(skip(self))]
    pub async fn remove(&self, document_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        // Writing first takes the write lock up front.
        sqlx::query(include_str!("../queries/release_document_chunks.sql"))
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let ranges = sqlx::query(include_str!("../queries/delete_document_ranges.sql"))
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        let documents = sqlx::query(include_str!("../queries/delete_document.sql"))
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(ranges, committed = documents > 0, "Removed document");
        Ok(ranges + documents > 0)
    }

    /// Remove ranges of never-committed documents and reset every chunk's
    /// reference count to the number of ranges pointing at it.
    ///
    /// Must not run concurrently with ingests.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let stale_ranges = sqlx::query(include_str!("../queries/delete_uncommitted_ranges.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        let reconciled_chunks = sqlx::query(include_str!("../queries/reconcile_ref_counts.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(RecoveryReport { stale_ranges, reconciled_chunks })
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let row: StatsRow = sqlx::query_as(include_str!("../queries/stats.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        IndexStats::try_from(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_compress::Codec;
    use corpus_storage::{ChunkLocation, fingerprint};

    async fn setup() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    fn new_chunk(data: &[u8], offset: u64) -> NewChunk {
        let fp = fingerprint(data);
        NewChunk {
            hash: fp.strong,
            fast_digest: fp.fast,
            codec: Codec::None,
            raw_len: data.len() as u64,
            stored_len: data.len() as u64,
            location: ChunkLocation { offset, length: 60 + data.len() as u64 },
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_by_fast_digest() {
        let repo = setup().await;
        let chunk = new_chunk(b"AAAA", 0);
        let inserted = repo.insert_chunk(&chunk).await.unwrap();
        assert_eq!(inserted.ref_count, 1);

        let bucket = repo.find_by_fast_digest(chunk.fast_digest).await.unwrap();
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].hash, chunk.hash);
        assert_eq!(bucket[0].location, chunk.location);
        assert!(repo.find_by_fast_digest(chunk.fast_digest.wrapping_add(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let repo = setup().await;
        repo.insert_chunk(&new_chunk(b"AAAA", 0)).await.unwrap();
        let err = repo.insert_chunk(&new_chunk(b"AAAA", 64)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
    }

    #[tokio::test]
    async fn test_indexed_end() {
        let repo = setup().await;
        assert_eq!(repo.indexed_end().await.unwrap(), 0);
        repo.insert_chunk(&new_chunk(b"BBBBBB", 64)).await.unwrap();
        repo.insert_chunk(&new_chunk(b"AAAA", 0)).await.unwrap();
        assert_eq!(repo.indexed_end().await.unwrap(), 64 + 66);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let repo = setup().await;
        let chunk = new_chunk(b"AAAA", 0);
        repo.insert_chunk(&chunk).await.unwrap();
        assert_eq!(repo.acquire(&chunk.hash).await.unwrap(), 2);
        assert_eq!(repo.release(&chunk.hash).await.unwrap(), 1);
        assert_eq!(repo.release(&chunk.hash).await.unwrap(), 0);
        assert_eq!(repo.release(&chunk.hash).await.unwrap(), 0);

        let missing = ChunkHash::of(b"missing");
        let err = repo.acquire(&missing).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChunkNotFound(_)));
    }

    #[tokio::test]
    async fn test_overlapping_record_conflicts() {
        let repo = setup().await;
        let one = new_chunk(b"0123456789", 0);
        let two = new_chunk(b"abcdefghij", 70);
        repo.insert_chunk(&one).await.unwrap();
        repo.insert_chunk(&two).await.unwrap();

        repo.record("doc3", ByteRange::new(0, 10), &one.hash, 0).await.unwrap();
        let err = repo.record("doc3", ByteRange::new(5, 15), &two.hash, 0).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict { document_id, range } if document_id == "doc3" && *range == ByteRange::new(5, 15)));

        // Adjacent ranges and other documents are fine.
        repo.record("doc3", ByteRange::new(10, 20), &two.hash, 0).await.unwrap();
        repo.record("doc4", ByteRange::new(5, 15), &two.hash, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_validates_slice() {
        let repo = setup().await;
        let chunk = new_chunk(b"0123456789", 0);
        repo.insert_chunk(&chunk).await.unwrap();

        let err = repo.record("doc", ByteRange::new(4, 4), &chunk.hash, 0).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRange(_)));
        // Six bytes starting at inner offset five run past the chunk.
        let err = repo.record("doc", ByteRange::new(0, 6), &chunk.hash, 5).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRange(_)));
        let err = repo.record("doc", ByteRange::new(0, 4), &ChunkHash::of(b"nope"), 0).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChunkNotFound(_)));
    }

    async fn three_chunk_document(repo: &Repository) {
        for (i, data) in [&b"aaaa"[..], b"bbbbbb", b"cc"].into_iter().enumerate() {
            repo.insert_chunk(&new_chunk(data, i as u64 * 100)).await.unwrap();
        }
        repo.record("doc", ByteRange::new(0, 4), &ChunkHash::of(b"aaaa"), 0).await.unwrap();
        repo.record("doc", ByteRange::new(4, 10), &ChunkHash::of(b"bbbbbb"), 0).await.unwrap();
        repo.record("doc", ByteRange::new(10, 12), &ChunkHash::of(b"cc"), 0).await.unwrap();
        repo.commit_document("doc", 12).await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_clips_to_range() {
        let repo = setup().await;
        three_chunk_document(&repo).await;

        let slices = repo.lookup("doc", ByteRange::new(2, 11)).await.unwrap();
        let summary: Vec<_> = slices.iter().map(|s| (s.range, s.inner_offset, s.inner_length)).collect();
        assert_eq!(
            summary,
            vec![(ByteRange::new(2, 4), 2, 2), (ByteRange::new(4, 10), 0, 6), (ByteRange::new(10, 11), 0, 1)]
        );
        assert_eq!(slices[1].chunk.hash, ChunkHash::of(b"bbbbbb"));
        assert_eq!(slices[0].cut(b"aaaa"), Some(&b"aa"[..]));

        let single = repo.lookup("doc", ByteRange::new(5, 7)).await.unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!((single[0].inner_offset, single[0].inner_length), (1, 2));
        assert!(repo.lookup("doc", ByteRange::new(3, 3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_reports_gaps() {
        let repo = setup().await;
        three_chunk_document(&repo).await;
        let err = repo.lookup("doc", ByteRange::new(0, 20)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Gap { offset: 12, .. }));
        let err = repo.lookup("unknown", ByteRange::new(0, 1)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Gap { offset: 0, .. }));
    }

    #[tokio::test]
    async fn test_commit_is_once_only() {
        let repo = setup().await;
        assert_eq!(repo.document_length("doc").await.unwrap(), None);
        repo.commit_document("doc", 0).await.unwrap();
        assert_eq!(repo.document_length("doc").await.unwrap(), Some(0));
        let err = repo.commit_document("doc", 0).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DocumentExists(_)));
        assert_eq!(repo.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_remove_releases_references() {
        let repo = setup().await;
        let chunk = new_chunk(b"AAAA", 0);
        repo.insert_chunk(&chunk).await.unwrap();
        repo.acquire(&chunk.hash).await.unwrap();
        repo.record("doc1", ByteRange::new(0, 4), &chunk.hash, 0).await.unwrap();
        repo.record("doc2", ByteRange::new(0, 4), &chunk.hash, 0).await.unwrap();
        repo.commit_document("doc1", 4).await.unwrap();
        repo.commit_document("doc2", 4).await.unwrap();

        assert!(repo.remove("doc1").await.unwrap());
        assert_eq!(repo.get_chunk(&chunk.hash).await.unwrap().unwrap().ref_count, 1);
        assert_eq!(repo.document_length("doc1").await.unwrap(), None);
        assert!(!repo.remove("doc1").await.unwrap());

        assert!(repo.remove("doc2").await.unwrap());
        let orphans = repo.list_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        // Orphans stay until purged.
        assert!(repo.get_chunk(&chunk.hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_orphan_only_when_unreferenced() {
        let repo = setup().await;
        let chunk = new_chunk(b"AAAA", 0);
        repo.insert_chunk(&chunk).await.unwrap();
        assert!(!repo.delete_orphan(&chunk.hash).await.unwrap());
        repo.release(&chunk.hash).await.unwrap();
        assert!(repo.delete_orphan(&chunk.hash).await.unwrap());
        assert!(repo.get_chunk(&chunk.hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_drops_uncommitted_and_reconciles() {
        let repo = setup().await;
        let kept = new_chunk(b"kept", 0);
        let stale = new_chunk(b"stale", 64);
        repo.insert_chunk(&kept).await.unwrap();
        repo.insert_chunk(&stale).await.unwrap();
        repo.record("committed", ByteRange::new(0, 4), &kept.hash, 0).await.unwrap();
        repo.commit_document("committed", 4).await.unwrap();
        // An ingest that acquired and recorded, then never committed.
        repo.acquire(&kept.hash).await.unwrap();
        repo.record("interrupted", ByteRange::new(0, 4), &kept.hash, 0).await.unwrap();
        repo.record("interrupted", ByteRange::new(4, 9), &stale.hash, 0).await.unwrap();

        let report = repo.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { stale_ranges: 2, reconciled_chunks: 2 });
        assert_eq!(repo.get_chunk(&kept.hash).await.unwrap().unwrap().ref_count, 1);
        assert_eq!(repo.get_chunk(&stale.hash).await.unwrap().unwrap().ref_count, 0);
        assert!(repo.recover().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_stats() {
        let repo = setup().await;
        assert_eq!(repo.stats().await.unwrap(), IndexStats::default());
        three_chunk_document(&repo).await;
        repo.release(&ChunkHash::of(b"cc")).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.orphaned_chunks, 1);
        assert_eq!(stats.live_chunks(), 2);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.logical_bytes, 12);
        assert_eq!(stats.indexed_bytes, 3 * 60 + 12);
        assert_eq!(stats.reclaimable_bytes, 62);
    }
}
