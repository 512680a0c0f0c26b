//! Codec Operations

use crate::Codec;
use crate::error::{ErrorKind, Result};
use brotli::{CompressorWriter as BrotliEncoder, Decompressor as BrotliDecoder};
use exn::ResultExt;
use flate2::{Compression as GzLevel, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};
use tracing::instrument;
use xz2::{read::XzDecoder, write::XzEncoder};

// Gzip is the "fast" codec, so it stays on the balanced default level. The
// high-ratio codecs trade CPU for space, just short of their maximum levels,
// which cost several times as much for a percent or two on chunk-sized input.
const GZIP_LEVEL: u32 = 6;
const XZ_LEVEL: u32 = 6;
const BROTLI_LEVEL: u32 = 9;
const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LG_WINDOW_SIZE: u32 = 22;

impl Codec {
    /// Compress a byte slice in memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use corpus_compress::Codec;
    ///
    /// let data = b"Hello, world!";
    /// let compressed = Codec::Gzip.compress(data).unwrap();
    /// assert_eq!(Codec::Gzip.decompress(&compressed).unwrap(), data);
    /// ```
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.compress_into(input, &mut output)?;
        Ok(output)
    }

    /// Decompress a byte slice in memory.
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.decoder(input).read_to_end(&mut output).or_raise(|| ErrorKind::InvalidData)?;
        Ok(output)
    }

    /// Decompress a payload whose decoded length is known up front.
    ///
    /// Never decodes more than `expected + 1` bytes, so a corrupt payload
    /// cannot balloon memory. Returns [`ErrorKind::LengthMismatch`] when the
    /// decoded length differs from `expected`.
    ///
    /// ```
    /// use corpus_compress::Codec;
    ///
    /// let payload = Codec::Xz.compress(b"abcabcabcabc").unwrap();
    /// assert_eq!(Codec::Xz.decompress_exact(&payload, 12).unwrap(), b"abcabcabcabc");
    /// assert!(Codec::Xz.decompress_exact(&payload, 11).is_err());
    /// ```
    #[instrument(skip(input), fields(codec = %self, input_size = input.len()))]
    pub fn decompress_exact(&self, input: &[u8], expected: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(expected);
        let limit = u64::try_from(expected).unwrap_or(u64::MAX).saturating_add(1);
        self.decoder(input).take(limit).read_to_end(&mut output).or_raise(|| ErrorKind::InvalidData)?;
        if output.len() != expected {
            exn::bail!(ErrorKind::LengthMismatch { expected, actual: output.len() });
        }
        Ok(output)
    }

    #[instrument(skip(input, output), fields(
        codec = %self,
        input_size = input.len(),
        output_size
    ))]
    pub fn compress_into(&self, input: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        let start = output.len();
        match self {
            Codec::None => output.extend_from_slice(input),
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(&mut *output, GzLevel::new(GZIP_LEVEL));
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
            Codec::Brotli => {
                let mut encoder =
                    BrotliEncoder::new(&mut *output, BROTLI_BUFFER_SIZE, BROTLI_LEVEL, BROTLI_LG_WINDOW_SIZE);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                // The stream is only terminated when the encoder is dropped.
                drop(encoder);
            },
            Codec::Xz => {
                let mut encoder = XzEncoder::new(&mut *output, XZ_LEVEL);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?;
            },
        }
        let size = output.len() - start;
        tracing::Span::current().record("output_size", size);
        Ok(size)
    }

    fn decoder<'a>(&self, input: &'a [u8]) -> Box<dyn Read + 'a> {
        match self {
            Codec::None => Box::new(input),
            Codec::Gzip => Box::new(GzDecoder::new(input)),
            Codec::Brotli => Box::new(BrotliDecoder::new(input, BROTLI_BUFFER_SIZE)),
            Codec::Xz => Box::new(XzDecoder::new(input)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Codec;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(Codec::None)]
    #[case(Codec::Gzip)]
    #[case(Codec::Brotli)]
    #[case(Codec::Xz)]
    fn test_compress_decompress(#[case] codec: Codec) {
        let original = b"Hello, world! This is a test of some compression.";
        let compressed = codec.compress(original).unwrap();
        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[rstest]
    #[case(Codec::None)]
    #[case(Codec::Gzip)]
    #[case(Codec::Brotli)]
    #[case(Codec::Xz)]
    fn test_empty_input(#[case] codec: Codec) {
        let compressed = codec.compress(b"").unwrap();
        assert!(codec.decompress_exact(&compressed, 0).unwrap().is_empty());
    }

    #[rstest]
    #[case(Codec::Gzip)]
    #[case(Codec::Xz)]
    // Brotli has no header to reject, and may decode garbage to something.
    fn test_invalid_compressed_data(#[case] codec: Codec) {
        let invalid_data = b"This is not compressed data";
        assert!(codec.decompress(invalid_data).is_err());
    }

    #[rstest]
    #[case(Codec::Gzip)]
    #[case(Codec::Brotli)]
    #[case(Codec::Xz)]
    fn test_redundant_input_shrinks(#[case] codec: Codec) {
        let original = b"knowledge corpus ".repeat(512);
        let compressed = codec.compress(&original).unwrap();
        assert!(compressed.len() < original.len() / 4);
    }

    #[test]
    fn test_decompress_exact_rejects_wrong_length() {
        let payload = Codec::Gzip.compress(b"0123456789").unwrap();
        let err = Codec::Gzip.decompress_exact(&payload, 4).unwrap_err();
        assert_eq!(*err, ErrorKind::LengthMismatch { expected: 4, actual: 5 });
        let err = Codec::Gzip.decompress_exact(&payload, 20).unwrap_err();
        assert_eq!(*err, ErrorKind::LengthMismatch { expected: 20, actual: 10 });
    }

    #[test]
    fn test_compress_into_appends() {
        let mut output = b"header".to_vec();
        let written = Codec::None.compress_into(b"body", &mut output).unwrap();
        assert_eq!(written, 4);
        assert_eq!(output, b"headerbody");
    }
}
