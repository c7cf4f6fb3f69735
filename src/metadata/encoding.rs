//! The `Ascii` / `Binary` marker types distinguishing the two metadata
//! value encodings: a value is either a UTF-8 string or a binary blob.

use base64::Engine as _;
use bytes::Bytes;
use http::header::HeaderValue;
use std::error::Error;
use std::fmt;
use std::hash::Hash;

/// A no-pad base64 engine tolerant of either padded or unpadded input on
/// decode, matching how other gRPC implementations emit `-bin` metadata.
mod base64_engine {
    use base64::alphabet;
    use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
    use base64::engine::DecodePaddingMode;

    pub(crate) const STANDARD_NO_PAD: GeneralPurpose = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_encode_padding(false)
            .with_decode_padding_mode(DecodePaddingMode::Indifferent),
    );
}

/// A possible error when converting a `MetadataValue` from a string or byte
/// slice.
#[derive(Debug, Hash)]
pub struct InvalidMetadataValue {
    _priv: (),
}

impl InvalidMetadataValue {
    pub(crate) fn new() -> Self {
        InvalidMetadataValue { _priv: () }
    }
}

impl fmt::Display for InvalidMetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse metadata value")
    }
}

impl Error for InvalidMetadataValue {}

mod sealed {
    use super::InvalidMetadataValue;
    use bytes::Bytes;
    use http::header::HeaderValue;

    pub trait Sealed {
        fn from_bytes(value: &[u8]) -> Result<HeaderValue, InvalidMetadataValue>;
        fn from_shared(value: Bytes) -> Result<HeaderValue, InvalidMetadataValue>;
        fn decode(value: &HeaderValue) -> Result<Bytes, InvalidMetadataValue>;
    }
}

/// Sealed trait distinguishing how a `MetadataValue<VE>` is encoded on the
/// wire; implemented only by [`Ascii`] and [`Binary`].
pub trait ValueEncoding: Clone + Eq + PartialEq + Hash + sealed::Sealed {
    /// True if `key` is a valid metadata key for this encoding. Binary
    /// values require a `-bin` suffixed key; ascii values forbid it.
    fn is_valid_key(key: &str) -> bool;
}

/// Marker type: metadata values under non-`-bin` keys, valid-UTF-8 /
/// visible-ASCII strings.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Ascii {}

/// Marker type: metadata values under `-bin` suffixed keys, arbitrary
/// bytes, base64-encoded on the wire.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Binary {}

impl sealed::Sealed for Ascii {
    fn from_bytes(value: &[u8]) -> Result<HeaderValue, InvalidMetadataValue> {
        HeaderValue::from_bytes(value).map_err(|_| InvalidMetadataValue::new())
    }

    fn from_shared(value: Bytes) -> Result<HeaderValue, InvalidMetadataValue> {
        HeaderValue::from_maybe_shared(value).map_err(|_| InvalidMetadataValue::new())
    }

    fn decode(value: &HeaderValue) -> Result<Bytes, InvalidMetadataValue> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl ValueEncoding for Ascii {
    fn is_valid_key(key: &str) -> bool {
        !key.ends_with("-bin")
    }
}

impl sealed::Sealed for Binary {
    fn from_bytes(value: &[u8]) -> Result<HeaderValue, InvalidMetadataValue> {
        let encoded = base64_engine::STANDARD_NO_PAD.encode(value);
        HeaderValue::from_maybe_shared(Bytes::from(encoded)).map_err(|_| InvalidMetadataValue::new())
    }

    fn from_shared(value: Bytes) -> Result<HeaderValue, InvalidMetadataValue> {
        Self::from_bytes(&value)
    }

    fn decode(value: &HeaderValue) -> Result<Bytes, InvalidMetadataValue> {
        base64_engine::STANDARD_NO_PAD
            .decode(value.as_bytes())
            .map(Bytes::from)
            .map_err(|_| InvalidMetadataValue::new())
    }
}

impl ValueEncoding for Binary {
    fn is_valid_key(key: &str) -> bool {
        key.ends_with("-bin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_encode_omits_padding() {
        let encoded = Binary::from_bytes(b"hello").unwrap();
        assert!(!encoded.as_bytes().ends_with(b"="));
    }

    #[test]
    fn binary_decode_accepts_padded_and_unpadded_input() {
        let unpadded = HeaderValue::from_static("aGVsbG8");
        let padded = HeaderValue::from_static("aGVsbG8=");
        assert_eq!(Binary::decode(&unpadded).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(Binary::decode(&padded).unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn ascii_is_valid_key_excludes_bin_suffix() {
        assert!(Ascii::is_valid_key("x-custom"));
        assert!(!Ascii::is_valid_key("x-custom-bin"));
        assert!(Binary::is_valid_key("x-custom-bin"));
        assert!(!Binary::is_valid_key("x-custom"));
    }
}
