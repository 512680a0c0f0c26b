use crate::error::Error;
use crate::models::chunk::to_u64;

/// Aggregate counters over the whole index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub chunks: u64,
    pub orphaned_chunks: u64,
    /// Container bytes referenced by chunk rows (headers included).
    pub indexed_bytes: u64,
    /// Container bytes held by zero-reference chunks.
    pub reclaimable_bytes: u64,
    pub documents: u64,
    /// Sum of committed document lengths.
    pub logical_bytes: u64,
}

impl IndexStats {
    pub fn live_chunks(&self) -> u64 {
        self.chunks - self.orphaned_chunks
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct StatsRow {
    chunks: i64,
    orphaned_chunks: i64,
    indexed_bytes: i64,
    reclaimable_bytes: i64,
    documents: i64,
    logical_bytes: i64,
}

impl TryFrom<StatsRow> for IndexStats {
    type Error = Error;
    fn try_from(row: StatsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            chunks: to_u64(row.chunks, "chunk count")?,
            orphaned_chunks: to_u64(row.orphaned_chunks, "orphan count")?,
            indexed_bytes: to_u64(row.indexed_bytes, "indexed bytes")?,
            reclaimable_bytes: to_u64(row.reclaimable_bytes, "reclaimable bytes")?,
            documents: to_u64(row.documents, "document count")?,
            logical_bytes: to_u64(row.logical_bytes, "logical bytes")?,
        })
    }
}

/// What [`Repository::recover`](crate::Repository::recover) repaired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Range rows removed because their document was never committed.
    pub stale_ranges: u64,
    /// Chunks whose reference count disagreed with their range rows.
    pub reconciled_chunks: u64,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.stale_ranges == 0 && self.reconciled_chunks == 0
    }
}
