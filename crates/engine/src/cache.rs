//! Smart cache of decompressed query results.
//!
//! Entries are keyed by a BLAKE3 fingerprint of the [`QuerySignature`] and
//! carry their own TTL. An expired entry is never returned: reads check
//! expiry and evict lazily, inserts sweep expired entries before evicting
//! live ones, and [`SmartCache::spawn_sweeper`] sweeps periodically.
//!
//! The lock is a plain `std::sync::Mutex`, held only for map operations and
//! never across an `.await`.

use corpus_index::ByteRange;
use lru::LruCache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Everything that determines a query's result bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuerySignature {
    pub document_id: String,
    pub range: ByteRange,
    /// Transform applied to the raw bytes. Only the identity exists today.
    pub transform: &'static str,
}

impl QuerySignature {
    pub const IDENTITY: &'static str = "identity";

    pub fn new(document_id: impl Into<String>, range: ByteRange) -> Self {
        Self { document_id: document_id.into(), range, transform: Self::IDENTITY }
    }

    fn key(&self) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        hasher.update(&(self.document_id.len() as u64).to_le_bytes());
        hasher.update(self.document_id.as_bytes());
        hasher.update(&self.range.start.to_le_bytes());
        hasher.update(&self.range.end.to_le_bytes());
        hasher.update(&(self.transform.len() as u64).to_le_bytes());
        hasher.update(self.transform.as_bytes());
        CacheKey(*hasher.finalize().as_bytes())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey([u8; 32]);

struct CacheEntry {
    document_id: String,
    bytes: Arc<[u8]>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

struct State {
    entries: LruCache<CacheKey, CacheEntry>,
    bytes: u64,
}

impl State {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.bytes -= entry.bytes.len() as u64;
        Some(entry)
    }

    fn remove_where(&mut self, mut predicate: impl FnMut(&CacheEntry) -> bool) -> usize {
        let doomed: Vec<CacheKey> =
            self.entries.iter().filter(|(_, entry)| predicate(entry)).map(|(key, _)| *key).collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: u64,
    /// Hits over lookups; zero before the first lookup.
    pub hit_rate: f64,
}

pub struct SmartCache {
    state: Mutex<State>,
    max_entries: usize,
    max_bytes: u64,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Bumped by every invalidation, under the state lock.
    generation: AtomicU64,
}

impl SmartCache {
    pub fn new(max_entries: usize, max_bytes: u64, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State { entries: LruCache::unbounded(), bytes: 0 }),
            max_entries: max_entries.max(1),
            max_bytes,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &corpus_config::CacheConfig) -> Self {
        Self::new(config.max_entries, config.max_bytes, config.ttl())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Every mutation leaves the state consistent before it can panic.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, signature: &QuerySignature) -> Option<Arc<[u8]>> {
        self.get_at(signature, Instant::now())
    }

    pub(crate) fn get_at(&self, signature: &QuerySignature, now: Instant) -> Option<Arc<[u8]>> {
        let key = signature.key();
        let mut state = self.state();
        let found = match state.entries.get(&key).map(|entry| (entry.is_expired(now), entry.bytes.clone())) {
            Some((false, bytes)) => Some(bytes),
            Some((true, _)) => {
                state.remove(&key);
                None
            },
            None => None,
        };
        drop(state);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert with the default TTL.
    pub fn put(&self, signature: &QuerySignature, bytes: Arc<[u8]>) {
        self.put_with_ttl(signature, bytes, self.default_ttl);
    }

    pub fn put_with_ttl(&self, signature: &QuerySignature, bytes: Arc<[u8]>, ttl: Duration) {
        self.put_at(signature, bytes, ttl, Instant::now(), None);
    }

    /// Current invalidation generation. Pass it to [`put_since`](Self::put_since)
    /// to cache a result computed after this point.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Insert with the default TTL unless an invalidation happened since
    /// `generation` was read, in which case the bytes may be stale.
    pub fn put_since(&self, signature: &QuerySignature, bytes: Arc<[u8]>, generation: u64) {
        self.put_at(signature, bytes, self.default_ttl, Instant::now(), Some(generation));
    }

    pub(crate) fn put_at(
        &self,
        signature: &QuerySignature,
        bytes: Arc<[u8]>,
        ttl: Duration,
        now: Instant,
        since: Option<u64>,
    ) {
        let size = bytes.len() as u64;
        if size > self.max_bytes {
            tracing::debug!(size, budget = self.max_bytes, "Result larger than cache budget; not cached");
            return;
        }
        let key = signature.key();
        let mut state = self.state();
        if since.is_some_and(|generation| generation != self.generation.load(Ordering::Acquire)) {
            tracing::debug!(document_id = %signature.document_id, "Result raced an invalidation; not cached");
            return;
        }
        state.remove(&key);

        if state.entries.len() >= self.max_entries || state.bytes + size > self.max_bytes {
            let expired = state.remove_where(|entry| entry.is_expired(now));
            if expired > 0 {
                tracing::debug!(expired, "Evicted expired cache entries");
            }
        }
        let mut evicted = 0usize;
        while state.entries.len() >= self.max_entries || state.bytes + size > self.max_bytes {
            let Some((_, entry)) = state.entries.pop_lru() else { break };
            state.bytes -= entry.bytes.len() as u64;
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted least recently used cache entries");
        }

        let entry = CacheEntry { document_id: signature.document_id.clone(), bytes, inserted_at: now, ttl };
        state.bytes += size;
        state.entries.put(key, entry);
    }

    /// Drop every entry derived from `document_id`.
    pub fn invalidate_document(&self, document_id: &str) -> usize {
        let mut state = self.state();
        self.generation.fetch_add(1, Ordering::AcqRel);
        state.remove_where(|entry| entry.document_id == document_id)
    }

    /// Evict all expired entries now.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        self.state().remove_where(|entry| entry.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let state = self.state();
            (state.entries.len(), state.bytes)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 };
        CacheStats { hits, misses, entries, bytes, hit_rate }
    }

    /// Sweep every `period` until the cache is dropped or the task aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let swept = cache.sweep();
                if swept > 0 {
                    tracing::debug!(swept, "Cache sweep evicted expired entries");
                }
            }
        })
    }
}
