//! Deduplicating chunk engine.
//!
//! Documents are split into content-defined chunks. Each chunk is
//! fingerprinted, stored at most once (compressed by a content-aware codec
//! choice) and referenced from the index by document range. Queries
//! reassemble ranges from the index and store, behind a TTL cache.
//!
//! ```no_run
//! # async fn demo() -> corpus_engine::error::Result<()> {
//! use corpus_engine::{ByteRange, Engine};
//!
//! let engine = Engine::open(&corpus_config::Config::default()).await?;
//! engine.ingest("doc1", b"AAAA").await?;
//! let bytes = engine.query("doc1", ByteRange::new(1, 3)).await?;
//! assert_eq!(bytes.as_deref(), Some(&b"AA"[..]));
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod chunker;
mod dedup;
mod engine;
pub mod error;
mod ingest;
mod query;
mod stripes;

pub use crate::cache::{CacheStats, QuerySignature, SmartCache};
pub use crate::chunker::Chunker;
pub use crate::engine::{CONTAINER_FILE, Engine, EngineStats, INDEX_FILE, PurgeReport, VerifyFailure, VerifyReport};
pub use crate::ingest::{IngestReport, IngestedChunk};
pub use corpus_index::ByteRange;
pub use corpus_storage::ChunkHash;
