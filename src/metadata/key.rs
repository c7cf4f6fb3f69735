use super::encoding::{Ascii, Binary, ValueEncoding};
use http::header::HeaderName;
use std::error::Error;
use std::fmt;
use std::marker::PhantomData;

/// A metadata field name, generic over its value encoding so that an ascii
/// key and a `-bin` key can never be confused at the type level.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct MetadataKey<VE: ValueEncoding> {
    pub(crate) inner: HeaderName,
    _marker: PhantomData<VE>,
}

pub type AsciiMetadataKey = MetadataKey<Ascii>;
pub type BinaryMetadataKey = MetadataKey<Binary>;

#[derive(Debug)]
pub struct InvalidMetadataKey {
    _priv: (),
}

impl InvalidMetadataKey {
    fn new() -> Self {
        InvalidMetadataKey { _priv: () }
    }
}

impl fmt::Display for InvalidMetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid metadata key")
    }
}

impl Error for InvalidMetadataKey {}

impl<VE: ValueEncoding> MetadataKey<VE> {
    /// Parses and lower-cases `src` into a `MetadataKey`, rejecting keys
    /// whose `-bin` suffix doesn't match `VE`.
    pub fn from_bytes(src: &[u8]) -> Result<Self, InvalidMetadataKey> {
        let name = HeaderName::from_bytes(src).map_err(|_| InvalidMetadataKey::new())?;
        if !VE::is_valid_key(name.as_str()) {
            return Err(InvalidMetadataKey::new());
        }
        Ok(MetadataKey { inner: name, _marker: PhantomData })
    }

    /// Like [`Self::from_bytes`] but panics on an invalid key. Intended for
    /// compile-time-known constant keys.
    pub fn from_static(src: &'static str) -> Self {
        let name = HeaderName::from_static(src);
        if !VE::is_valid_key(name.as_str()) {
            panic!("invalid metadata key: {src}");
        }
        MetadataKey { inner: name, _marker: PhantomData }
    }

    /// Always lower-case, per the data model invariant.
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl<VE: ValueEncoding> std::str::FromStr for MetadataKey<VE> {
    type Err = InvalidMetadataKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

impl<VE: ValueEncoding> fmt::Debug for MetadataKey<VE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<VE: ValueEncoding> fmt::Display for MetadataKey<VE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<VE: ValueEncoding> AsRef<str> for MetadataKey<VE> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_rejects_bin_suffix() {
        assert!(AsciiMetadataKey::from_bytes(b"trace-bin").is_err());
    }

    #[test]
    fn binary_requires_bin_suffix() {
        assert!(BinaryMetadataKey::from_bytes(b"trace").is_err());
        assert!(BinaryMetadataKey::from_bytes(b"trace-bin").is_ok());
    }

    #[test]
    fn keys_are_lowercased() {
        let key = AsciiMetadataKey::from_bytes(b"X-Custom").unwrap();
        assert_eq!(key.as_str(), "x-custom");
    }
}
