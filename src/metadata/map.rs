use super::encoding::{Ascii, Binary, ValueEncoding};
use super::key::{AsciiMetadataKey, BinaryMetadataKey, InvalidMetadataKey, MetadataKey};
use super::value::{AsciiMetadataValue, BinaryMetadataValue, MetadataValue};
use http::HeaderMap;

pub(crate) const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// An ordered multimap of gRPC custom metadata entries.
/// Backed by `http::HeaderMap`, since the validation rules (lower-case
/// ASCII keys, one of two value encodings) line up with
/// `HeaderName`/`HeaderValue` almost exactly.
#[derive(Clone, Debug, Default)]
pub struct MetadataMap {
    headers: HeaderMap,
}

impl MetadataMap {
    pub fn new() -> Self {
        MetadataMap { headers: HeaderMap::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MetadataMap { headers: HeaderMap::with_capacity(capacity) }
    }

    /// Wrap an existing `HeaderMap`. Used at the C3 boundary to view the
    /// HEADERS frame's header map as gRPC metadata without copying.
    pub fn from_headers(headers: HeaderMap) -> Self {
        MetadataMap { headers }
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<AsciiMetadataValue> {
        self.headers
            .get(key)
            .map(|v| MetadataValue::unchecked_from_header_value(v.clone()))
    }

    pub fn get_bin(&self, key: &str) -> Option<BinaryMetadataValue> {
        if !key.ends_with("-bin") {
            return None;
        }
        self.headers
            .get(key)
            .map(|v| MetadataValue::unchecked_from_header_value(v.clone()))
    }

    pub fn get_all(&self, key: &str) -> impl Iterator<Item = AsciiMetadataValue> + '_ {
        self.headers
            .get_all(key)
            .into_iter()
            .map(|v| MetadataValue::unchecked_from_header_value(v.clone()))
    }

    pub fn insert(&mut self, key: AsciiMetadataKey, value: AsciiMetadataValue) -> Option<AsciiMetadataValue> {
        self.headers
            .insert(key.inner, value.into_header_value())
            .map(MetadataValue::unchecked_from_header_value)
    }

    pub fn insert_bin(&mut self, key: BinaryMetadataKey, value: BinaryMetadataValue) -> Option<BinaryMetadataValue> {
        self.headers
            .insert(key.inner, value.into_header_value())
            .map(MetadataValue::unchecked_from_header_value)
    }

    pub fn append(&mut self, key: AsciiMetadataKey, value: AsciiMetadataValue) {
        self.headers.append(key.inner, value.into_header_value());
    }

    pub fn remove(&mut self, key: &str) -> Option<AsciiMetadataValue> {
        self.headers.remove(key).map(MetadataValue::unchecked_from_header_value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.headers.keys().map(|k| k.as_str())
    }

    /// Iterate `(key, value)` pairs, distinguishing ascii vs. binary keys by
    /// the `-bin` suffix as the data model requires ("never mixed").
    pub fn iter(&self) -> impl Iterator<Item = KeyAndValueRef<'_>> {
        self.headers.iter().map(|(k, v)| {
            if k.as_str().ends_with("-bin") {
                KeyAndValueRef::Binary(k.as_str(), v.as_bytes())
            } else {
                KeyAndValueRef::Ascii(k.as_str(), v)
            }
        })
    }

    /// Parse out the `grpc-timeout` header's duration, if present.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.headers
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| super::timeout::parse_grpc_timeout(v).ok().flatten())
    }
}

#[derive(Debug)]
pub enum KeyAndValueRef<'a> {
    Ascii(&'a str, &'a http::HeaderValue),
    Binary(&'a str, &'a [u8]),
}

/// Round-trip conversions between `AsciiMetadataKey`/`Value` and plain
/// strings, used to check `decode(encode(M)) == M`.
impl MetadataMap {
    pub fn decode_entries(&self) -> Vec<(String, Vec<u8>)> {
        self.iter()
            .map(|kv| match kv {
                KeyAndValueRef::Ascii(k, v) => (k.to_string(), v.as_bytes().to_vec()),
                KeyAndValueRef::Binary(k, v) => (k.to_string(), v.to_vec()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn insert_and_get() {
        let mut map = MetadataMap::new();
        map.insert(
            AsciiMetadataKey::from_static("x-host"),
            "example.com".parse().unwrap(),
        );
        assert!(map.contains_key("x-host"));
        assert_eq!(map.get("x-host").unwrap().to_str().unwrap(), "example.com");
    }

    #[test]
    fn bin_key_requires_suffix() {
        let mut map = MetadataMap::new();
        map.insert_bin(
            BinaryMetadataKey::from_static("trace-bin"),
            BinaryMetadataValue::from_bytes(b"\x01\x02"),
        );
        assert!(map.get_bin("trace-bin").is_some());
        assert!(map.get_bin("trace").is_none());
    }

    #[test]
    fn remove_then_absent() {
        let mut map = MetadataMap::new();
        map.insert(AsciiMetadataKey::from_static("x-a"), "1".parse().unwrap());
        assert!(map.remove("x-a").is_some());
        assert!(!map.contains_key("x-a"));
    }

    #[quickcheck]
    fn decode_encode_is_idempotent(pairs: Vec<(String, String)>) -> TestResult {
        let mut map = MetadataMap::new();
        for (k, v) in &pairs {
            let Ok(key) = AsciiMetadataKey::from_bytes(k.to_lowercase().as_bytes()) else {
                return TestResult::discard();
            };
            let Ok(val) = AsciiMetadataValue::try_from_bytes(v.as_bytes()) else {
                return TestResult::discard();
            };
            map.append(key, val);
        }

        let first = map.decode_entries();
        // re-encode: rebuild a fresh map from the decoded entries and decode
        // again; the two decodings must agree (keys already lower-cased).
        let mut rebuilt = MetadataMap::new();
        for (k, v) in &first {
            let key = AsciiMetadataKey::from_bytes(k.as_bytes()).unwrap();
            let val = AsciiMetadataValue::try_from_bytes(v).unwrap();
            rebuilt.append(key, val);
        }
        let second = rebuilt.decode_entries();

        TestResult::from_bool(first == second)
    }
}
