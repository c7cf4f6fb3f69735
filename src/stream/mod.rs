//! The per-stream gRPC framing handler. Gates RPC acceptance (request
//! admission), reassembles the length-prefix message framing, and tracks
//! one RPC's cancellation and write ordering.

pub mod codec;

use crate::error::Error;
use crate::metadata::{parse_grpc_timeout, shorter_of};
use crate::status::{Code, Status};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

const GRPC_ENCODING_HEADER: &str = "grpc-encoding";
const GRPC_ACCEPT_ENCODING_HEADER: &str = "grpc-accept-encoding";

/// Encodings this crate will negotiate the *name* of. Actual
/// compression/decompression is out of scope.
pub const SUPPORTED_ENCODINGS: &[&str] = &["identity", "gzip", "deflate"];

/// What request admission decided to do with the first inbound HEADERS
/// frame.
#[derive(Debug)]
pub enum AdmissionOutcome {
    /// Admitted; `request_encoding` is the (already-validated) `grpc-encoding`
    /// the client will use, if it sent one.
    Accepted { request_encoding: Option<String> },
    /// `content-type` was missing or not `application/grpc*` — respond with
    /// this plain HTTP status, `endStream`, and no gRPC body at all.
    RejectHttp(http::StatusCode),
    /// Otherwise-malformed request — respond 200 with gRPC trailers.
    RejectGrpc(Status),
}

/// Validate the first HEADERS frame of an inbound request on the server
/// side.
pub fn admit_request(parts: &http::request::Parts) -> AdmissionOutcome {
    let content_type_ok = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.starts_with("application/grpc"))
        .unwrap_or(false);
    if !content_type_ok {
        trace!(path = %parts.uri.path(), "rejecting request: bad or missing content-type");
        return AdmissionOutcome::RejectHttp(http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    if parts.method != http::Method::POST {
        return AdmissionOutcome::RejectGrpc(Status::new(
            Code::InvalidArgument,
            format!("Expected POST, got {}", parts.method),
        ));
    }

    match parts.uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => {
            return AdmissionOutcome::RejectGrpc(Status::new(
                Code::InvalidArgument,
                "Unsupported or missing :scheme, expected http or https",
            ));
        }
    }

    if parts.uri.path().is_empty() {
        return AdmissionOutcome::RejectGrpc(Status::new(Code::InvalidArgument, "Missing :path"));
    }

    let request_encoding = parts
        .headers
        .get(GRPC_ENCODING_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if let Some(encoding) = &request_encoding {
        if !SUPPORTED_ENCODINGS.contains(&encoding.as_str()) {
            trace!(encoding, "rejecting request: unsupported grpc-encoding");
            return AdmissionOutcome::RejectGrpc(Status::new(
                Code::Unimplemented,
                format!("Unsupported grpc-encoding: {encoding}"),
            ));
        }
    }

    trace!(path = %parts.uri.path(), "request admitted");
    AdmissionOutcome::Accepted { request_encoding }
}

/// Append the `grpc-accept-encoding` header this crate always answers a
/// rejection or response with.
pub fn accepted_encodings_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(GRPC_ACCEPT_ENCODING_HEADER),
        HeaderValue::from_static("identity,gzip,deflate"),
    )
}

/// Compression negotiation: the server's outbound `grpc-encoding` is
/// the negotiated algorithm — `preferred` (a server-configured default or
/// override) if the client accepts it, else `identity`.
pub fn negotiate_response_encoding(preferred: Option<&str>, client_accepted: &[String]) -> &'static str {
    if let Some(preferred) = preferred {
        if let Some(found) = SUPPORTED_ENCODINGS.iter().find(|e| **e == preferred) {
            if client_accepted.is_empty() || client_accepted.iter().any(|e| e == *found) {
                return found;
            }
        }
    }
    "identity"
}

/// Resolve the effective RPC deadline from the client's `grpc-timeout`
/// header and an optional server-configured default, reusing the same
/// wire grammar and shorter-of-two-durations rule as the client side.
pub fn resolve_deadline(headers: &http::HeaderMap, server_default: Option<Duration>) -> Result<Option<Duration>, Status> {
    let client_timeout = match headers.get(crate::metadata::GRPC_TIMEOUT_HEADER) {
        Some(value) => match parse_grpc_timeout(value) {
            Ok(d) => d,
            Err(_) => return Err(Status::new(Code::InvalidArgument, "malformed grpc-timeout header")),
        },
        None => None,
    };

    Ok(shorter_of(client_timeout, server_default))
}

/// Derive `:authority` for an outbound (client) request: a user override
/// wins, otherwise the endpoint's canonical authority.
pub fn derive_authority(user_override: Option<&str>, endpoint_authority: &str) -> String {
    user_override.unwrap_or(endpoint_authority).to_string()
}

/// The SNI hostname used for TLS: the authority with any trailing `:port`
/// stripped.
pub fn derive_sni_hostname(authority: &str) -> &str {
    if let Some(idx) = authority.rfind(':') {
        // Guard against stripping the port separator inside an IPv6
        // literal's brackets, e.g. `[::1]:443`.
        if !authority[idx..].contains(']') {
            return &authority[..idx];
        }
    }
    authority
}

/// Edge-triggered cancellation signal for one RPC:
/// an inbound `RST_STREAM`, a `ChannelShouldQuiesce` signal, or local
/// shutdown all fire it; firing twice is a no-op.
#[derive(Clone)]
pub struct CancellationHandle {
    fired: Rc<Cell<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        CancellationHandle { fired: Rc::new(Cell::new(false)) }
    }

    /// Fire the cancellation. Returns `true` the first time it is called,
    /// `false` on every call after.
    pub fn cancel(&self) -> bool {
        !self.fired.replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.get()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The write side of one stream: messages and trailers must reach the wire
/// in the order submitted. Implemented by an external collaborator (actual
/// body/trailers I/O is out of scope here); this crate only guarantees the
/// call order by never starting write N+1 before write N's future resolves.
#[async_trait]
pub trait StreamSink: Send {
    async fn write_message(&mut self, frame: bytes::Bytes) -> Result<(), Error>;
    async fn write_trailers(&mut self, status: &Status) -> Result<(), Error>;
}

/// Notified whenever a stream successfully flushes a HEADERS/DATA frame.
/// The server connection manager implements this to satisfy gRFC A8's rule
/// that legitimate outbound activity clears keep-alive ping strikes,
/// without `StreamWriter` needing to know about connections at all.
#[async_trait]
pub trait ConnectionActivity: Send + Sync {
    async fn note_write_flushed(&self);
}

/// Sequences writes onto a [`StreamSink`], enforcing the write-ordering
/// guarantee and the "write after close is a programming error" rule.
pub struct StreamWriter<S: StreamSink> {
    sink: S,
    closed: bool,
    activity: Option<std::sync::Arc<dyn ConnectionActivity>>,
}

impl<S: StreamSink> StreamWriter<S> {
    pub fn new(sink: S) -> Self {
        StreamWriter { sink, closed: false, activity: None }
    }

    /// Like [`Self::new`], but reports every successful flush to `activity`
    /// (the owning connection's keep-alive state, typically).
    pub fn with_activity(sink: S, activity: std::sync::Arc<dyn ConnectionActivity>) -> Self {
        StreamWriter { sink, closed: false, activity: Some(activity) }
    }

    pub async fn write_message(&mut self, compressed: bool, payload: &[u8]) -> Result<(), Status> {
        if self.closed {
            return Err(Status::new(Code::Internal, "Invalid state"));
        }
        let frame = codec::encode_frame(compressed, payload);
        self.sink.write_message(frame).await.map_err(|err| Status::map_error(err))?;
        if let Some(activity) = &self.activity {
            activity.note_write_flushed().await;
        }
        Ok(())
    }

    pub async fn write_trailers(&mut self, status: Status) -> Result<(), Status> {
        if self.closed {
            return Err(Status::new(Code::Internal, "Invalid state"));
        }
        self.closed = true;
        self.sink.write_trailers(&status).await.map_err(|err| Status::map_error(err))?;
        if let Some(activity) = &self.activity {
            activity.note_write_flushed().await;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
