use crate::error::{Error, ErrorKind};
use corpus_compress::Codec;
use corpus_storage::{ChunkHash, ChunkLocation, FastDigest};
use exn::ResultExt;
use time::UtcDateTime;

/// A chunk the engine is about to register, after its record was appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChunk {
    pub hash: ChunkHash,
    pub fast_digest: FastDigest,
    pub codec: Codec,
    pub raw_len: u64,
    pub stored_len: u64,
    pub location: ChunkLocation,
}

/// A registered chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    pub hash: ChunkHash,
    pub fast_digest: FastDigest,
    pub codec: Codec,
    pub raw_len: u64,
    pub stored_len: u64,
    pub location: ChunkLocation,
    pub ref_count: u64,
    pub created_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ChunkRow {
    pub(crate) hash: String,
    pub(crate) fast_digest: i64,
    pub(crate) codec: String,
    pub(crate) raw_length: i64,
    pub(crate) stored_length: i64,
    pub(crate) store_offset: i64,
    pub(crate) record_length: i64,
    pub(crate) ref_count: i64,
    pub(crate) created_at: i64,
}

pub(crate) fn to_i64(value: u64, what: &'static str) -> Result<i64, Error> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData(what))
}

pub(crate) fn to_u64(value: i64, what: &'static str) -> Result<u64, Error> {
    u64::try_from(value).or_raise(|| ErrorKind::InvalidData(what))
}

impl TryFrom<(&NewChunk, UtcDateTime)> for ChunkRow {
    type Error = Error;
    fn try_from((chunk, created_at): (&NewChunk, UtcDateTime)) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: chunk.hash.to_hex(),
            fast_digest: i64::from(chunk.fast_digest),
            codec: chunk.codec.as_str().to_string(),
            raw_length: to_i64(chunk.raw_len, "raw length")?,
            stored_length: to_i64(chunk.stored_len, "stored length")?,
            store_offset: to_i64(chunk.location.offset, "store offset")?,
            record_length: to_i64(chunk.location.length, "record length")?,
            ref_count: 1,
            created_at: created_at.unix_timestamp(),
        })
    }
}

impl TryFrom<ChunkRow> for ChunkRecord {
    type Error = Error;
    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: row.hash.parse::<ChunkHash>().or_raise(|| ErrorKind::InvalidData("chunk hash"))?,
            fast_digest: FastDigest::try_from(row.fast_digest).or_raise(|| ErrorKind::InvalidData("fast digest"))?,
            codec: row.codec.parse::<Codec>().or_raise(|| ErrorKind::InvalidData("codec"))?,
            raw_len: to_u64(row.raw_length, "raw length")?,
            stored_len: to_u64(row.stored_length, "stored length")?,
            location: ChunkLocation {
                offset: to_u64(row.store_offset, "store offset")?,
                length: to_u64(row.record_length, "record length")?,
            },
            ref_count: to_u64(row.ref_count, "reference count")?,
            created_at: UtcDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("creation date"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chunk() -> NewChunk {
        NewChunk {
            hash: ChunkHash::of(b"AAAA"),
            fast_digest: u32::MAX,
            codec: Codec::Xz,
            raw_len: 4,
            stored_len: 4,
            location: ChunkLocation { offset: 128, length: 64 },
        }
    }

    #[test]
    fn test_model_to_row() {
        let row = ChunkRow::try_from((&new_chunk(), UtcDateTime::UNIX_EPOCH)).unwrap();
        assert_eq!(row.codec, "xz");
        assert_eq!(row.fast_digest, i64::from(u32::MAX));
        assert_eq!(row.ref_count, 1);
        assert_eq!(row.hash.len(), 64);
    }

    #[test]
    fn test_row_to_model() {
        let row = ChunkRow::try_from((&new_chunk(), UtcDateTime::UNIX_EPOCH)).unwrap();
        let record = ChunkRecord::try_from(row).unwrap();
        assert_eq!(record.hash, new_chunk().hash);
        assert_eq!(record.fast_digest, u32::MAX);
        assert_eq!(record.location, new_chunk().location);
        assert_eq!(record.ref_count, 1);
    }

    #[test]
    fn test_negative_columns_are_invalid() {
        let mut row = ChunkRow::try_from((&new_chunk(), UtcDateTime::UNIX_EPOCH)).unwrap();
        row.store_offset = -1;
        let err = ChunkRecord::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("store offset")));
    }
}
