//! SQLite chunk index.
//!
//! The index is the durable half of the engine's bookkeeping: which chunks
//! exist (by content hash), where their records sit in the container, how
//! many logical references each one has, and which chunk slices make up
//! each document. Raw bytes never pass through this crate.
//!
//! # Tables
//! - **chunks**: one row per distinct content hash, with its container
//!   location, codec and reference count.
//! - **ranges**: `(document_id, range_start)` to a slice of one chunk.
//! - **documents**: committed documents and their total length. Ranges of a
//!   document without a row here are leftovers of an interrupted ingest.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{ByteRange, ChunkRecord, ChunkSlice, IndexStats, NewChunk, RecoveryReport};
pub use crate::repo::Repository;
