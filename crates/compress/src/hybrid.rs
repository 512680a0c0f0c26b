//! Hybrid compression: select, apply, fall back.

use crate::error::Result;
use crate::{Codec, select};
use tracing::instrument;

/// A chunk payload together with the codec that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compressed {
    pub codec: Codec,
    pub payload: Vec<u8>,
}

impl Compressed {
    fn raw(input: &[u8]) -> Self {
        Self { codec: Codec::None, payload: input.to_vec() }
    }

    /// Length of the payload as it will be stored.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Compress `input` with the codec chosen by [`select`].
///
/// Never fails: if the chosen codec errors, or its output is not strictly
/// smaller than the input, the raw bytes are kept with [`Codec::None`].
///
/// ```
/// use corpus_compress::{Codec, compress, decompress};
///
/// let text = b"redundant text, redundant text, redundant text\n".repeat(100);
/// let compressed = compress(&text);
/// assert_ne!(compressed.codec, Codec::None);
/// assert!(compressed.len() < text.len());
/// assert_eq!(decompress(compressed.codec, &compressed.payload).unwrap(), text);
/// ```
#[instrument(skip(input), fields(input_size = input.len(), codec, output_size))]
pub fn compress(input: &[u8]) -> Compressed {
    let compressed = match select(input) {
        Codec::None => Compressed::raw(input),
        codec => match codec.compress(input) {
            Ok(payload) if payload.len() < input.len() => Compressed { codec, payload },
            Ok(payload) => {
                tracing::debug!(%codec, output_size = payload.len(), "Codec output not smaller than input; storing raw");
                Compressed::raw(input)
            },
            Err(error) => {
                tracing::debug!(%codec, error = ?error, "Codec failed; storing raw");
                Compressed::raw(input)
            },
        },
    };
    let span = tracing::Span::current();
    span.record("codec", compressed.codec.as_str());
    span.record("output_size", compressed.len());
    compressed
}

/// Decompress a payload produced by [`compress`].
pub fn decompress(codec: Codec, payload: &[u8]) -> Result<Vec<u8>> {
    codec.decompress(payload)
}
