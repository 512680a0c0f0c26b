mod chunk;
mod document;
mod range;

pub(crate) use self::chunk::{ChunkRow, to_i64};
pub use self::chunk::{ChunkRecord, NewChunk};
pub use self::document::{IndexStats, RecoveryReport};
pub(crate) use self::document::StatsRow;
pub use self::range::{ByteRange, ChunkSlice};
pub(crate) use self::range::SliceRow;
