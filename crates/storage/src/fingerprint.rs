//! Content fingerprints.
//!
//! A [`Fingerprint`] pairs a CRC-32 fast digest (a bucket key that may
//! collide) with a BLAKE3 hash (the identity of a chunk's bytes). Both are
//! pure functions of the input bytes.

use crate::error::{Error, ErrorKind};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// Fast, non-cryptographic digest used to bucket candidate chunks.
pub type FastDigest = u32;

/// BLAKE3 hash identifying a chunk's decompressed content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash([u8; 32]);

impl ChunkHash {
    pub const LEN: usize = 32;

    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, as stored in the index.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl Display for ChunkHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for ChunkHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..16])
    }
}

impl FromStr for ChunkHash {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match blake3::Hash::from_hex(s) {
            Ok(hash) => Ok(Self(*hash.as_bytes())),
            Err(_) => exn::bail!(ErrorKind::InvalidHash(s.to_string())),
        }
    }
}

/// The (fast digest, strong hash) pair for a byte sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub fast: FastDigest,
    pub strong: ChunkHash,
}

impl Fingerprint {
    /// Fingerprint `bytes`. The fast digest is computed first.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let fast = fast_digest(bytes);
        let strong = ChunkHash::of(bytes);
        Self { fast, strong }
    }
}

/// Compute only the fast digest, for cheap bucket lookups.
#[inline]
#[must_use]
pub fn fast_digest(bytes: &[u8]) -> FastDigest {
    crc32fast::hash(bytes)
}

/// Compute the full fingerprint of `bytes`.
///
/// ```
/// use corpus_storage::fingerprint;
///
/// let a = fingerprint(b"AAAA");
/// assert_eq!(a, fingerprint(b"AAAA"));
/// assert_ne!(a.strong, fingerprint(b"AAAB").strong);
/// ```
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint::of(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_well_defined() {
        let fp = fingerprint(b"");
        assert_eq!(fp.fast, 0);
        // BLAKE3 of the empty string.
        assert_eq!(fp.strong.to_hex(), "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262");
    }

    #[test]
    fn test_fast_digest_matches_crc32() {
        assert_eq!(fast_digest(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = ChunkHash::of(b"knowledge");
        let parsed: ChunkHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
        assert_eq!(hash.to_hex().len(), 2 * ChunkHash::LEN);
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let err = "not-a-hash".parse::<ChunkHash>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidHash(_)));
        assert!("abcd".parse::<ChunkHash>().is_err());
    }

    #[test]
    fn test_debug_is_abbreviated() {
        let hash = ChunkHash::of(b"");
        assert_eq!(format!("{hash:?}"), "ChunkHash(af1349b9f5f9a1a6)");
    }
}
