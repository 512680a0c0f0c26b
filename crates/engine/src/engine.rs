use crate::cache::{CacheStats, SmartCache};
use crate::chunker::Chunker;
use crate::dedup::Deduplicator;
use crate::error::{ErrorKind, Result};
use crate::stripes::Stripes;
use corpus_config::Config;
use corpus_index::{Database, Repository};
use corpus_storage::backend::{LocalBackend, MemoryBackend};
use corpus_storage::error::ErrorKind as StorageErrorKind;
use corpus_storage::{BackendHandle, ChunkHash, ChunkLocation, ChunkStore};
use exn::ResultExt;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Container file inside the data directory.
pub const CONTAINER_FILE: &str = "chunks.pack";
/// Index database inside the data directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// A deduplicating chunk engine over one container and one index.
///
/// Every engine owns its own cache and locks; two engines opened on the
/// same data directory do not coordinate.
pub struct Engine {
    pub(crate) index: Repository,
    pub(crate) store: ChunkStore,
    pub(crate) cache: Arc<SmartCache>,
    pub(crate) chunker: Chunker,
    pub(crate) dedup: Deduplicator,
    pub(crate) documents: Stripes,
    db: Database,
    sweeper: Option<JoinHandle<()>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EngineStats {
    pub total_chunks: u64,
    pub live_chunks: u64,
    pub orphaned_chunks: u64,
    pub documents: u64,
    /// Sum of committed document lengths.
    pub total_logical_bytes: u64,
    /// Length of the chunk container, record headers and dead bytes included.
    pub total_physical_bytes: u64,
    /// Container bytes held by zero-reference chunks.
    pub reclaimable_bytes: u64,
    /// Logical over physical bytes; `1.0` for an empty container.
    pub dedup_ratio: f64,
    pub cache_hit_rate: f64,
    pub cache: CacheStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub purged: u64,
    /// Container bytes no longer referenced by the index. They stay in the
    /// container until it is rewritten.
    pub reclaimable_bytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub records: u64,
    /// Container bytes covered by readable records.
    pub bytes: u64,
    /// Records the index does not point at.
    pub unindexed: u64,
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyFailure {
    pub offset: u64,
    /// `None` when the record header itself was unreadable.
    pub hash: Option<ChunkHash>,
    pub reason: String,
}

impl Engine {
    /// Open (or create) the durable engine rooted at `config.data_dir`.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let data_dir = std::path::absolute(&config.data_dir).or_raise(|| ErrorKind::Config)?;
        // Opening the container creates the data directory.
        let backend = LocalBackend::open("local", data_dir.join(CONTAINER_FILE))
            .await
            .map_err(|err| ErrorKind::storage(err, None))?
            .with_sync_writes(config.store.sync_writes);
        let db = Database::connect(data_dir.join(INDEX_FILE)).await.map_err(ErrorKind::index)?;
        Self::from_parts(config, Arc::new(backend), db).await
    }

    /// An engine that lives entirely in memory.
    pub async fn in_memory(config: &Config) -> Result<Self> {
        let db = Database::connect_in_memory().await.map_err(ErrorKind::index)?;
        Self::from_parts(config, Arc::new(MemoryBackend::new("memory")), db).await
    }

    /// Assemble an engine from an opened container and index, recovering
    /// whatever an interrupted ingest left behind.
    pub async fn from_parts(config: &Config, backend: BackendHandle, db: Database) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let index = Repository::from(&db);
        let store = ChunkStore::new(backend).with_limit(config.store.max_bytes);

        Self::repair_container(&index, &store).await?;
        let recovery = index.recover().await.map_err(ErrorKind::index)?;
        if recovery.is_clean() {
            tracing::debug!("Index is consistent");
        } else {
            tracing::info!(
                stale_ranges = recovery.stale_ranges,
                reconciled_chunks = recovery.reconciled_chunks,
                "Recovered index after interrupted writes"
            );
        }

        let cache = Arc::new(SmartCache::from_config(&config.cache));
        let sweeper = config.cache.sweep_interval().map(|period| cache.spawn_sweeper(period));
        let container = store.len().await.map_err(|err| ErrorKind::storage(err, None))?;
        tracing::info!(store = store.name(), container_bytes = container, "Engine ready");

        Ok(Self {
            dedup: Deduplicator::new(index.clone(), store.clone(), config.dedup.stripes),
            documents: Stripes::new(config.dedup.stripes),
            chunker: Chunker::new(&config.chunking),
            index,
            store,
            cache,
            db,
            sweeper,
        })
    }

    /// Cut off a container tail that no longer parses as records, as left
    /// by a crash partway through an append. Unreadable bytes ahead of an
    /// indexed record are kept for [`verify`](Self::verify) to report.
    async fn repair_container(index: &Repository, store: &ChunkStore) -> Result<()> {
        let storage = |err| ErrorKind::storage(err, None);
        let len = store.len().await.map_err(storage)?;
        let readable = store.readable_len().await.map_err(storage)?;
        if readable == len {
            return Ok(());
        }
        let indexed_end = index.indexed_end().await.map_err(ErrorKind::index)?;
        if indexed_end > readable {
            tracing::warn!(offset = readable, indexed_end, "Unreadable record ahead of indexed chunks");
            return Ok(());
        }
        tracing::warn!(offset = readable, discarded = len - readable, "Truncating torn container tail");
        store.truncate(readable).await.map_err(storage)
    }

    /// Flush the container and close the index.
    pub async fn close(mut self) -> Result<()> {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        let synced = self.store.sync().await.map_err(|err| ErrorKind::storage(err, None));
        self.db.close().await;
        tracing::info!("Engine closed");
        synced
    }

    pub fn cache(&self) -> &SmartCache {
        &self.cache
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let index = self.index.stats().await.map_err(ErrorKind::index)?;
        let physical = self.store.len().await.map_err(|err| ErrorKind::storage(err, None))?;
        let cache = self.cache.stats();
        let dedup_ratio = if physical == 0 { 1.0 } else { index.logical_bytes as f64 / physical as f64 };
        Ok(EngineStats {
            total_chunks: index.chunks,
            live_chunks: index.live_chunks(),
            orphaned_chunks: index.orphaned_chunks,
            documents: index.documents,
            total_logical_bytes: index.logical_bytes,
            total_physical_bytes: physical,
            reclaimable_bytes: index.reclaimable_bytes,
            dedup_ratio,
            cache_hit_rate: cache.hit_rate,
            cache,
        })
    }

    /// Drop index rows of chunks no document references any more.
    #[instrument(skip(self))]
    pub async fn purge_orphans(&self) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();
        for orphan in self.index.list_orphans().await.map_err(ErrorKind::index)? {
            if self.dedup.purge(&orphan).await? {
                report.purged += 1;
                report.reclaimable_bytes += orphan.location.length;
            }
        }
        tracing::info!(purged = report.purged, reclaimable_bytes = report.reclaimable_bytes, "Purged orphaned chunks");
        Ok(report)
    }

    /// Scan every record in the container. With `decode`, also decompress
    /// each payload and check it against its hash.
    ///
    /// A header that cannot be read ends the scan, since the next record's
    /// position is unknown.
    #[instrument(skip(self))]
    pub async fn verify(&self, decode: bool) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut records = std::pin::pin!(self.store.records());
        while let Some(item) = records.next().await {
            let (location, header) = match item {
                Ok(record) => record,
                Err(err) => {
                    let offset = match &*err {
                        StorageErrorKind::Corrupt { offset, .. } => *offset,
                        _ => report.bytes,
                    };
                    report.failures.push(VerifyFailure { offset, hash: None, reason: err.to_string() });
                    break;
                },
            };
            report.records += 1;
            report.bytes = location.end();

            let indexed = self.index.get_chunk(&header.hash).await.map_err(ErrorKind::index)?;
            if indexed.is_none_or(|chunk| chunk.location != location) {
                report.unindexed += 1;
            }
            if decode && let Err(reason) = self.decode(location, header.hash).await {
                report.failures.push(VerifyFailure { offset: location.offset, hash: Some(header.hash), reason });
            }
        }
        tracing::info!(
            records = report.records,
            unindexed = report.unindexed,
            failures = report.failures.len(),
            "Verified container"
        );
        Ok(report)
    }

    async fn decode(&self, location: ChunkLocation, hash: ChunkHash) -> std::result::Result<(), String> {
        let stored = self.store.read_expecting(location, &hash).await.map_err(|err| err.to_string())?;
        match tokio::task::spawn_blocking(move || stored.into_bytes()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => Err(err.to_string()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
