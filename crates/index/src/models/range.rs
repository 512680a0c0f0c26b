use crate::error::{Error, ErrorKind};
use crate::models::ChunkRecord;
use crate::models::chunk::{ChunkRow, to_u64};
use std::fmt::{self, Display, Formatter};

/// Half-open byte range `[start, end)` within a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Also true for inverted ranges.
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl From<std::ops::Range<u64>> for ByteRange {
    fn from(range: std::ops::Range<u64>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// The part of one chunk's decompressed bytes that a lookup needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSlice {
    pub chunk: ChunkRecord,
    /// The document bytes this slice provides.
    pub range: ByteRange,
    pub inner_offset: u64,
    pub inner_length: u64,
}

impl ChunkSlice {
    /// Cut this slice out of the chunk's decompressed bytes.
    pub fn cut<'a>(&self, chunk_bytes: &'a [u8]) -> Option<&'a [u8]> {
        let start = usize::try_from(self.inner_offset).ok()?;
        let end = start.checked_add(usize::try_from(self.inner_length).ok()?)?;
        chunk_bytes.get(start..end)
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SliceRow {
    pub(crate) range_start: i64,
    pub(crate) range_end: i64,
    pub(crate) inner_offset: i64,
    #[sqlx(flatten)]
    pub(crate) chunk: ChunkRow,
}

impl SliceRow {
    /// Clip the stored range to `wanted` and translate it into chunk
    /// coordinates.
    pub(crate) fn clip(self, wanted: ByteRange) -> Result<ChunkSlice, Error> {
        let stored = ByteRange::new(to_u64(self.range_start, "range start")?, to_u64(self.range_end, "range end")?);
        let inner_offset = to_u64(self.inner_offset, "inner offset")?;
        let clipped = ByteRange::new(stored.start.max(wanted.start), stored.end.min(wanted.end));
        if clipped.is_empty() {
            exn::bail!(ErrorKind::InvalidData("non-overlapping range row"));
        }
        Ok(ChunkSlice {
            chunk: ChunkRecord::try_from(self.chunk)?,
            range: clipped,
            inner_offset: inner_offset + (clipped.start - stored.start),
            inner_length: clipped.len(),
        })
    }
}
