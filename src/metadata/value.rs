use super::encoding::{Ascii, Binary, InvalidMetadataValue, ValueEncoding};
use bytes::Bytes;
use http::header::HeaderValue;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// A metadata value, generic over its encoding. `MetadataValue<Ascii>` is a
/// validated UTF-8/visible-ASCII string; `MetadataValue<Binary>` decodes
/// to/from arbitrary bytes via base64 on the wire.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct MetadataValue<VE: ValueEncoding> {
    inner: HeaderValue,
    _marker: PhantomData<VE>,
}

pub type AsciiMetadataValue = MetadataValue<Ascii>;
pub type BinaryMetadataValue = MetadataValue<Binary>;

impl<VE: ValueEncoding> MetadataValue<VE> {
    pub fn from_bytes(value: &[u8]) -> Self {
        Self::try_from_bytes(value).expect("invalid metadata value")
    }

    pub fn try_from_bytes(value: &[u8]) -> Result<Self, InvalidMetadataValue> {
        Ok(MetadataValue { inner: VE::from_bytes(value)?, _marker: PhantomData })
    }

    pub fn from_shared(value: Bytes) -> Result<Self, InvalidMetadataValue> {
        Ok(MetadataValue { inner: VE::from_shared(value)?, _marker: PhantomData })
    }

    pub fn from_static(value: &'static str) -> Self {
        Self::try_from_bytes(value.as_bytes()).expect("invalid static metadata value")
    }

    /// The decoded payload: for `Ascii` this is the raw header bytes; for
    /// `Binary` the `-bin` base64 layer is removed.
    pub fn to_bytes(&self) -> Result<Bytes, InvalidMetadataValue> {
        VE::decode(&self.inner)
    }

    pub(crate) fn unchecked_from_header_value(inner: HeaderValue) -> Self {
        MetadataValue { inner, _marker: PhantomData }
    }

    pub(crate) fn into_header_value(self) -> HeaderValue {
        self.inner
    }

    pub(crate) fn header_value_ref(&self) -> &HeaderValue {
        &self.inner
    }
}

impl MetadataValue<Ascii> {
    pub fn to_str(&self) -> Result<&str, InvalidMetadataValue> {
        self.inner.to_str().map_err(|_| InvalidMetadataValue::new())
    }
}

impl FromStr for MetadataValue<Ascii> {
    type Err = InvalidMetadataValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from_bytes(s.as_bytes())
    }
}

impl<VE: ValueEncoding> fmt::Debug for MetadataValue<VE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl PartialEq<str> for MetadataValue<Ascii> {
    fn eq(&self, other: &str) -> bool {
        self.inner.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for MetadataValue<Ascii> {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trips() {
        let v: AsciiMetadataValue = "example.com".parse().unwrap();
        assert_eq!(v.to_str().unwrap(), "example.com");
    }

    #[test]
    fn binary_base64_round_trips() {
        let raw = b"\x00\x01\xffbinary";
        let v = BinaryMetadataValue::from_bytes(raw);
        assert_eq!(v.to_bytes().unwrap(), Bytes::copy_from_slice(raw));
    }
}
