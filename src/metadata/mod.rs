//! gRPC custom metadata: ordered key/value pairs carried alongside a
//! request or response, distinct from the HTTP/2 pseudo-headers.

mod encoding;
mod key;
mod map;
mod timeout;
mod value;

pub use encoding::{Ascii, Binary, InvalidMetadataValue, ValueEncoding};
pub use key::{AsciiMetadataKey, BinaryMetadataKey, InvalidMetadataKey, MetadataKey};
pub use map::{KeyAndValueRef, MetadataMap};
pub use timeout::{parse_grpc_timeout, shorter_of};
pub use value::{AsciiMetadataValue, BinaryMetadataValue, MetadataValue};

pub(crate) use map::GRPC_TIMEOUT_HEADER;
