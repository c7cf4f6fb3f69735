//! gRPC `Status`/`Code`: the result type carried in trailers (or a
//! trailers-only response) at the end of every RPC, and the HTTP/2-to-gRPC
//! error mapping used when a stream dies at the protocol level instead of
//! via an explicit trailer.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use percent_encoding::{percent_decode, percent_encode, AsciiSet, CONTROLS};
use std::{error::Error as StdError, fmt};
use tracing::warn;

const GRPC_STATUS_HEADER_CODE: &str = "grpc-status";
const GRPC_STATUS_MESSAGE_HEADER: &str = "grpc-message";
const GRPC_STATUS_DETAILS_HEADER: &str = "grpc-status-details-bin";

// `grpc-message` may need percent-encoding; this mirrors the grpc-message
// encode set used by every other gRPC implementation (ASCII controls, `%`,
// and anything outside the printable range).
const ENCODE_SET: &AsciiSet = &CONTROLS.add(b'%').add(b'\\');

/// A gRPC "status" describing the result of an RPC call.
#[derive(Clone)]
pub struct Status {
    code: Code,
    message: String,
    details: Bytes,
}

/// gRPC status codes used by [`Status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    pub(crate) fn to_header_value(self) -> HeaderValue {
        HeaderValue::from_static(match self {
            Code::Ok => "0",
            Code::Cancelled => "1",
            Code::Unknown => "2",
            Code::InvalidArgument => "3",
            Code::DeadlineExceeded => "4",
            Code::NotFound => "5",
            Code::AlreadyExists => "6",
            Code::PermissionDenied => "7",
            Code::ResourceExhausted => "8",
            Code::FailedPrecondition => "9",
            Code::Aborted => "10",
            Code::OutOfRange => "11",
            Code::Unimplemented => "12",
            Code::Internal => "13",
            Code::Unavailable => "14",
            Code::DataLoss => "15",
            Code::Unauthenticated => "16",
        })
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Code {
        match bytes {
            b"0" => Code::Ok,
            b"1" => Code::Cancelled,
            b"2" => Code::Unknown,
            b"3" => Code::InvalidArgument,
            b"4" => Code::DeadlineExceeded,
            b"5" => Code::NotFound,
            b"6" => Code::AlreadyExists,
            b"7" => Code::PermissionDenied,
            b"8" => Code::ResourceExhausted,
            b"9" => Code::FailedPrecondition,
            b"10" => Code::Aborted,
            b"11" => Code::OutOfRange,
            b"12" => Code::Unimplemented,
            b"13" => Code::Internal,
            b"14" => Code::Unavailable,
            b"15" => Code::DataLoss,
            b"16" => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Maps a non-gRPC (trailers-less, plain HTTP) response status into the
    /// gRPC status it should be reported as. See the HTTP-to-gRPC mapping
    /// table carried by this transport's wire contract.
    pub fn from_http_status(status: http::StatusCode) -> Code {
        match status.as_u16() {
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            418 => Code::Unknown,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

impl Status {
    /// Create a new `Status` with the associated code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Status {
        Status {
            code,
            message: message.into(),
            details: Bytes::new(),
        }
    }

    /// Shorthand for `Status::new(Code::Ok, "")`.
    pub fn ok() -> Status {
        Status::new(Code::Ok, "")
    }

    /// Attach binary `grpc-status-details-bin` details to this status.
    pub fn with_details(code: Code, message: impl Into<String>, details: Bytes) -> Status {
        Status {
            code,
            message: message.into(),
            details,
        }
    }

    pub(crate) fn from_error(err: &(dyn StdError + 'static)) -> Status {
        Status::try_from_error(err).unwrap_or_else(|| Status::new(Code::Unknown, err.to_string()))
    }

    fn try_from_error(err: &(dyn StdError + 'static)) -> Option<Status> {
        let mut cause = Some(err);

        while let Some(err) = cause {
            if let Some(status) = err.downcast_ref::<Status>() {
                return Some(status.clone());
            }

            if let Some(h2) = err.downcast_ref::<h2::Error>() {
                return Some(Status::from_h2_error(h2));
            }

            cause = err.source();
        }

        None
    }

    /// The HTTP/2-to-gRPC error mapping: a stream dying at the protocol
    /// level (RST_STREAM, GOAWAY) carries no `grpc-status` trailer, so the
    /// caller has to be told something. See [PROTOCOL-HTTP2.md][spec].
    ///
    /// [spec]: https://github.com/grpc/grpc/blob/master/doc/PROTOCOL-HTTP2.md#errors
    pub fn from_h2_error(err: &h2::Error) -> Status {
        let code = match err.reason() {
            Some(h2::Reason::NO_ERROR)
            | Some(h2::Reason::PROTOCOL_ERROR)
            | Some(h2::Reason::INTERNAL_ERROR)
            | Some(h2::Reason::FLOW_CONTROL_ERROR)
            | Some(h2::Reason::SETTINGS_TIMEOUT)
            | Some(h2::Reason::COMPRESSION_ERROR)
            | Some(h2::Reason::CONNECT_ERROR) => Code::Internal,
            Some(h2::Reason::REFUSED_STREAM) => Code::Unavailable,
            Some(h2::Reason::CANCEL) => Code::Cancelled,
            Some(h2::Reason::ENHANCE_YOUR_CALM) => Code::ResourceExhausted,
            Some(h2::Reason::INADEQUATE_SECURITY) => Code::PermissionDenied,
            _ => Code::Unknown,
        };

        Status::new(code, format!("h2 protocol error: {err}"))
    }

    pub(crate) fn map_error<E>(err: E) -> Status
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Status::from_error(&*err.into())
    }

    /// Parse a `Status` out of a trailer (or trailers-only response header)
    /// map. Returns `None` if no `grpc-status` key is present.
    pub fn from_header_map(header_map: &HeaderMap) -> Option<Status> {
        header_map.get(GRPC_STATUS_HEADER_CODE).map(|code| {
            let code = Code::from_bytes(code.as_ref());
            let message = header_map
                .get(GRPC_STATUS_MESSAGE_HEADER)
                .map(|header| {
                    percent_decode(header.as_bytes())
                        .decode_utf8()
                        .map(|cow| cow.to_string())
                })
                .unwrap_or_else(|| Ok(String::new()));
            let details = header_map
                .get(GRPC_STATUS_DETAILS_HEADER)
                .map(|h| Bytes::copy_from_slice(h.as_bytes()))
                .unwrap_or_else(Bytes::new);

            match message {
                Ok(message) => Status {
                    code,
                    message,
                    details,
                },
                Err(err) => {
                    warn!("error decoding grpc-message header: {}", err);
                    Status {
                        code: Code::Unknown,
                        message: format!("error decoding grpc-message header: {err}"),
                        details,
                    }
                }
            }
        })
    }

    /// The gRPC `Code` of this `Status`.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The text error message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The opaque binary error details of this `Status`.
    pub fn details(&self) -> &[u8] {
        &self.details
    }

    /// Render this `Status` as a trailer `HeaderMap`.
    pub fn to_header_map(&self) -> Result<HeaderMap, Self> {
        let mut header_map = HeaderMap::with_capacity(3);
        self.add_header(&mut header_map)?;
        Ok(header_map)
    }

    pub(crate) fn add_header(&self, header_map: &mut HeaderMap) -> Result<(), Self> {
        header_map.insert(GRPC_STATUS_HEADER_CODE, self.code.to_header_value());

        if !self.message.is_empty() {
            let needs_encoding = self.message.bytes().any(|b| !b.is_ascii_graphic());
            let value: Bytes = if needs_encoding {
                percent_encode(self.message.as_bytes(), ENCODE_SET)
                    .to_string()
                    .into()
            } else {
                Bytes::copy_from_slice(self.message.as_bytes())
            };

            header_map.insert(
                GRPC_STATUS_MESSAGE_HEADER,
                HeaderValue::from_maybe_shared(value).map_err(invalid_header_value_byte)?,
            );
        }

        if !self.details.is_empty() {
            header_map.insert(
                GRPC_STATUS_DETAILS_HEADER,
                HeaderValue::from_maybe_shared(self.details.clone())
                    .map_err(invalid_header_value_byte)?,
            );
        }

        Ok(())
    }
}

fn invalid_header_value_byte<E: StdError>(err: E) -> Status {
    Status::new(Code::Internal, format!("invalid status header value: {err}"))
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Status");
        builder.field("code", &self.code);
        if !self.message.is_empty() {
            builder.field("message", &self.message);
        }
        if !self.details.is_empty() {
            builder.field("details", &self.details);
        }
        builder.finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {:?}, message: {:?}", self.code, self.message)
    }
}

impl StdError for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let status = Status::new(Code::NotFound, "no such widget");
        let headers = status.to_header_map().unwrap();
        let parsed = Status::from_header_map(&headers).unwrap();
        assert_eq!(parsed.code(), Code::NotFound);
        assert_eq!(parsed.message(), "no such widget");
    }

    #[test]
    fn empty_message_round_trip() {
        let status = Status::ok();
        let headers = status.to_header_map().unwrap();
        assert!(!headers.contains_key(GRPC_STATUS_MESSAGE_HEADER));
        let parsed = Status::from_header_map(&headers).unwrap();
        assert_eq!(parsed.code(), Code::Ok);
        assert_eq!(parsed.message(), "");
    }

    #[test]
    fn message_with_special_chars_round_trips() {
        let status = Status::new(Code::Unknown, "boom: 50% \\ done");
        let headers = status.to_header_map().unwrap();
        let parsed = Status::from_header_map(&headers).unwrap();
        assert_eq!(parsed.message(), "boom: 50% \\ done");
    }

    #[test]
    fn from_h2_error_maps_reasons() {
        let err: h2::Error = h2::Reason::ENHANCE_YOUR_CALM.into();
        let status = Status::from_h2_error(&err);
        assert_eq!(status.code(), Code::ResourceExhausted);
    }

    #[test]
    fn http_status_mapping_table() {
        assert_eq!(Code::from_http_status(http::StatusCode::BAD_REQUEST), Code::Internal);
        assert_eq!(Code::from_http_status(http::StatusCode::UNAUTHORIZED), Code::Unauthenticated);
        assert_eq!(Code::from_http_status(http::StatusCode::FORBIDDEN), Code::PermissionDenied);
        assert_eq!(Code::from_http_status(http::StatusCode::NOT_FOUND), Code::Unimplemented);
        assert_eq!(Code::from_http_status(http::StatusCode::IM_A_TEAPOT), Code::Unknown);
        assert_eq!(Code::from_http_status(http::StatusCode::TOO_MANY_REQUESTS), Code::Unavailable);
        assert_eq!(Code::from_http_status(http::StatusCode::BAD_GATEWAY), Code::Unavailable);
        assert_eq!(Code::from_http_status(http::StatusCode::SERVICE_UNAVAILABLE), Code::Unavailable);
        assert_eq!(Code::from_http_status(http::StatusCode::GATEWAY_TIMEOUT), Code::Unavailable);
    }
}
