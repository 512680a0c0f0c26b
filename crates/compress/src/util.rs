use crate::Codec;
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Codec {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Codec {
    /// Returns the one-byte tag persisted in chunk record headers.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Gzip => 1,
            Codec::Brotli => 2,
            Codec::Xz => 3,
        }
    }

    /// Returns the short name used in the index and for display.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Gzip => "gzip",
            Codec::Brotli => "brotli",
            Codec::Xz => "xz",
        }
    }

    /// Whether the payload is stored exactly as ingested.
    #[inline]
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Codec::None)
    }
}

#[cfg(test)]
mod tests {
    use crate::Codec;
    use rstest::rstest;

    #[rstest]
    #[case(Codec::None, "none")]
    #[case(Codec::Gzip, "gzip")]
    #[case(Codec::Brotli, "brotli")]
    #[case(Codec::Xz, "xz")]
    fn test_name_parses_back(#[case] codec: Codec, #[case] expected: &str) {
        assert_eq!(codec.to_string(), expected);
        assert_eq!(expected.parse::<Codec>().unwrap(), codec);
    }
}
