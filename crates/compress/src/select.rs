//! Codec selection.
//!
//! [`select`] decides which [`Codec`] a chunk should be stored with by
//! profiling a sample of its bytes. The decision is a pure function of the
//! input: no configuration, clock, or process state can alter it, so two
//! ingests of identical bytes always pick the same codec.
//!
//! Decision order (first match wins):
//!
//! 1. Shorter than [`MIN_COMPRESSIBLE_LEN`] → [`Codec::None`]; codec framing
//!    alone would outweigh any saving.
//! 2. Starts with the signature of an already-packed format (gzip, xz,
//!    bzip2, zstd, zip, 7z, PNG, JPEG, GIF) → [`Codec::None`].
//! 3. Sample entropy at or above [`HIGH_ENTROPY_BITS`] → [`Codec::None`].
//! 4. Sample is at least [`TEXT_RATIO`] text bytes → [`Codec::Brotli`].
//! 5. Sample entropy at or below [`LOW_ENTROPY_BITS`] → [`Codec::Xz`].
//! 6. Otherwise → [`Codec::Gzip`].

use crate::Codec;

/// Number of leading bytes profiled.
pub const SAMPLE_SIZE: usize = 64 * 1024;
/// Inputs shorter than this are always stored raw.
pub const MIN_COMPRESSIBLE_LEN: usize = 64;
/// Shannon entropy (bits per byte) at which content is treated as dense.
pub const HIGH_ENTROPY_BITS: f64 = 7.2;
/// Shannon entropy (bits per byte) under which binary content gets the high-ratio codec.
pub const LOW_ENTROPY_BITS: f64 = 5.0;
/// Fraction of text bytes in the sample for content to count as text.
pub const TEXT_RATIO: f64 = 0.95;

/// Packed formats this crate does not produce itself. Gzip and XZ are
/// recognised by [`Codec::from_magic_bytes`].
const FOREIGN_SIGNATURES: &[&[u8]] = &[
    // bzip2
    b"BZh",
    // zstd
    &[0x28, 0xB5, 0x2F, 0xFD],
    // zip (also docx, jar, epub, ...)
    &[0x50, 0x4B, 0x03, 0x04],
    // 7z
    &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C],
    // PNG
    &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
    // JPEG
    &[0xFF, 0xD8, 0xFF],
    // GIF
    b"GIF8",
];

/// Summary statistics of an input sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Profile {
    /// Total input length (not just the sample).
    pub len: usize,
    /// Number of bytes profiled.
    pub sampled: usize,
    /// Shannon entropy of the sample in bits per byte (0.0 to 8.0).
    pub entropy: f64,
    /// Fraction of sample bytes that are printable ASCII, whitespace, or
    /// part of a multi-byte UTF-8 sequence.
    pub text_ratio: f64,
    /// Whether the input starts with a known packed-format signature.
    pub packed: bool,
}

impl Profile {
    /// Profile the first [`SAMPLE_SIZE`] bytes of `input`.
    #[must_use]
    pub fn of(input: &[u8]) -> Self {
        let sample = &input[..input.len().min(SAMPLE_SIZE)];
        let mut histogram = [0u64; 256];
        let mut text = 0usize;
        for &byte in sample {
            histogram[usize::from(byte)] += 1;
            if byte.is_ascii_graphic() || byte.is_ascii_whitespace() || byte >= 0x80 {
                text += 1;
            }
        }
        let (entropy, text_ratio) = match sample.len() {
            0 => (0.0, 0.0),
            n => {
                let n = n as f64;
                let entropy = histogram
                    .iter()
                    .filter(|&&count| count > 0)
                    .map(|&count| {
                        let p = count as f64 / n;
                        -p * p.log2()
                    })
                    .sum();
                (entropy, text as f64 / n)
            },
        };
        Self {
            len: input.len(),
            sampled: sample.len(),
            entropy,
            text_ratio,
            packed: Codec::from_magic_bytes(input).is_some()
                || FOREIGN_SIGNATURES.iter().any(|signature| input.starts_with(signature)),
        }
    }

    /// Choose a codec for the profiled content.
    #[must_use]
    pub fn choose(&self) -> Codec {
        if self.len < MIN_COMPRESSIBLE_LEN || self.packed || self.entropy >= HIGH_ENTROPY_BITS {
            return Codec::None;
        }
        if self.text_ratio >= TEXT_RATIO {
            return Codec::Brotli;
        }
        if self.entropy <= LOW_ENTROPY_BITS {
            return Codec::Xz;
        }
        Codec::Gzip
    }
}

/// Select the codec for `input`.
///
/// ```
/// use corpus_compress::{Codec, select};
///
/// assert_eq!(select(b"AAAA"), Codec::None);
/// assert_eq!(select(&b"the quick brown fox jumps over the lazy dog\n".repeat(100)), Codec::Brotli);
/// ```
#[must_use]
pub fn select(input: &[u8]) -> Codec {
    Profile::of(input).choose()
}
