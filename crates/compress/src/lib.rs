//! Chunk codecs with content-driven selection.
//!
//! This crate wraps the compression libraries used for stored chunks behind
//! a single [`Codec`] tag, providing:
//!
//! - **In-memory** compression/decompression ([`Codec::compress`],
//!   [`Codec::decompress`], [`Codec::decompress_exact`])
//! - **Selection** of a codec from a sample of the content ([`select`]),
//!   a pure function of the input bytes
//! - **Hybrid** compression ([`compress`], [`decompress`]) that applies the
//!   selected codec and falls back to storing raw bytes whenever the codec
//!   fails or does not make the payload smaller
//!
//! The codec tag is persisted alongside every chunk, so decompression never
//! re-runs the selection heuristic.

mod construct;
pub mod error;
mod hybrid;
mod ops;
pub mod select;
mod util;

pub use crate::hybrid::{Compressed, compress, decompress};
pub use crate::select::{Profile, select};

/// The codec applied to a stored chunk.
///
/// Defaults to [`None`](Self::None) (stored raw).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Stored raw, uncompressed
    #[default]
    None,
    /// Gzip (DEFLATE); the fast codec
    Gzip,
    /// Brotli; the high-ratio codec for text
    Brotli,
    /// XZ/LZMA; the high-ratio codec for redundant binary data
    Xz,
}

impl Codec {
    /// All codecs, in tag order.
    pub const ALL: [Codec; 4] = [Codec::None, Codec::Gzip, Codec::Brotli, Codec::Xz];
}

#[cfg(test)]
mod tests {
    use crate::Codec;

    #[test]
    fn codec_default() {
        assert_eq!(Codec::default(), Codec::None);
    }
}
