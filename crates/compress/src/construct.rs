use crate::Codec;
use crate::error::{Error, ErrorKind};
use std::str::FromStr;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

impl FromStr for Codec {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "raw" => Ok(Codec::None),
            "gz" | "gzip" => Ok(Codec::Gzip),
            "br" | "brotli" => Ok(Codec::Brotli),
            "xz" | "lzma" => Ok(Codec::Xz),
            _ => exn::bail!(ErrorKind::UnsupportedCodec(s.to_string())),
        }
    }
}

impl TryFrom<u8> for Codec {
    type Error = Error;
    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Gzip),
            2 => Ok(Codec::Brotli),
            3 => Ok(Codec::Xz),
            _ => exn::bail!(ErrorKind::UnknownTag(tag)),
        }
    }
}

impl From<Codec> for u8 {
    fn from(codec: Codec) -> Self {
        codec.tag()
    }
}

impl Codec {
    /// Detect a codec from the leading magic bytes of a payload.
    ///
    /// Brotli has no magic bytes and raw payloads are arbitrary, so this
    /// only ever recognises Gzip and XZ.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&GZIP_MAGIC) {
            return Some(Codec::Gzip);
        }
        if bytes.starts_with(&XZ_MAGIC) {
            return Some(Codec::Xz);
        }
        None
    }
}
