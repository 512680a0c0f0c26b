//! Content-defined chunking.

use corpus_config::ChunkingConfig;
use corpus_index::ByteRange;
use fastcdc::v2020::FastCDC;

/// Splits documents at content-defined boundaries so that shared regions of
/// different documents produce identical chunks.
#[derive(Clone, Debug)]
pub struct Chunker {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
}

impl Chunker {
    /// Bounds must already be validated.
    pub fn new(config: &ChunkingConfig) -> Self {
        Self { min_size: config.min_size, avg_size: config.avg_size, max_size: config.max_size }
    }

    /// Byte ranges of `data`'s chunks, tiling it in order. Empty input has
    /// no chunks.
    pub fn split(&self, data: &[u8]) -> Vec<ByteRange> {
        if data.is_empty() {
            return Vec::new();
        }
        FastCDC::new(data, self.min_size, self.avg_size, self.max_size)
            .map(|chunk| ByteRange::new(chunk.offset as u64, (chunk.offset + chunk.length) as u64))
            .collect()
    }
}
