//! Physical chunk storage.
//!
//! Chunks live in an append-only container addressed by byte offset. Every
//! chunk is framed as a [`record`] (fixed header + payload) so a container
//! can be scanned and verified without the index. Containers are reached
//! through the [`ContainerBackend`] trait: a local file for durable engines,
//! and memory for tests and ephemeral engines.

pub mod backend;
pub mod error;
pub mod fingerprint;
pub mod record;
mod store;

pub use crate::backend::ContainerBackend;
pub use crate::fingerprint::{ChunkHash, FastDigest, Fingerprint, fingerprint};
pub use crate::record::{ChunkLocation, RecordHeader};
pub use crate::store::{ChunkStore, StoredChunk};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn ContainerBackend + Send + Sync>;
