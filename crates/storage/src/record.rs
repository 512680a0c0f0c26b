//! Chunk record framing.
//!
//! Every chunk written to a container is preceded by a fixed 60-byte header:
//!
//! | bytes   | field                                   |
//! |---------|-----------------------------------------|
//! | 0..4    | magic `KCK1`                            |
//! | 4       | codec tag                               |
//! | 5..8    | reserved, zero                          |
//! | 8..16   | decompressed length, u64 little-endian  |
//! | 16..24  | stored payload length, u64 little-endian|
//! | 24..56  | BLAKE3 of the decompressed bytes        |
//! | 56..60  | CRC-32 of bytes 0..56, little-endian    |
//!
//! The payload immediately follows the header.

use crate::error::{ErrorKind, Result};
use crate::fingerprint::ChunkHash;
use corpus_compress::Codec;

pub const MAGIC: [u8; 4] = *b"KCK1";
pub const HEADER_LEN: usize = 60;
const CRC_OFFSET: usize = 56;

/// Where a framed chunk record lives in a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkLocation {
    /// Offset of the record header.
    pub offset: u64,
    /// Header plus payload.
    pub length: u64,
}

impl ChunkLocation {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub codec: Codec,
    pub raw_len: u64,
    pub stored_len: u64,
    pub hash: ChunkHash,
}

impl RecordHeader {
    /// Total length of the record this header frames.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        HEADER_LEN as u64 + self.stored_len
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.codec.tag();
        buf[8..16].copy_from_slice(&self.raw_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.stored_len.to_le_bytes());
        buf[24..56].copy_from_slice(self.hash.as_bytes());
        let crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse and check a header read from `offset`. Only the first
    /// [`HEADER_LEN`] bytes of `bytes` are inspected.
    pub fn decode(bytes: &[u8], offset: u64) -> Result<Self> {
        let corrupt = |reason| ErrorKind::Corrupt { offset, reason };
        let Some(buf) = bytes.get(..HEADER_LEN) else {
            exn::bail!(corrupt("truncated header"));
        };
        if buf[0..4] != MAGIC {
            exn::bail!(corrupt("bad magic"));
        }
        let stored_crc = u32::from_le_bytes(le_array(&buf[CRC_OFFSET..]));
        if crc32fast::hash(&buf[..CRC_OFFSET]) != stored_crc {
            exn::bail!(corrupt("header checksum mismatch"));
        }
        let Ok(codec) = Codec::try_from(buf[4]) else {
            exn::bail!(corrupt("unknown codec tag"));
        };
        Ok(Self {
            codec,
            raw_len: u64::from_le_bytes(le_array(&buf[8..16])),
            stored_len: u64::from_le_bytes(le_array(&buf[16..24])),
            hash: ChunkHash::from_bytes(le_array(&buf[24..56])),
        })
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
