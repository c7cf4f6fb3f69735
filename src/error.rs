//! Error types shared across the connection core.
//!
//! [`Error`] is the opaque, boxed error used for connect failures and
//! unexpected-transport-error close causes. [`RpcError`] is the small
//! `(Code, Error)` pair surfaced as [`crate::ConnectionEvent::ConnectFailed`].

use crate::status::Code;
use std::{error, fmt};

/// Any error, type-erased. Connect failures and transport-level errors are
/// boxed into this rather than carrying a concrete type, since the
/// underlying I/O/TLS/multiplexer errors are supplied by an external
/// collaborator (see `transport`).
pub type Error = Box<dyn error::Error + Send + Sync + 'static>;

/// An RPC-facing error: a gRPC status code plus the underlying cause.
///
/// Used specifically for `ConnectionEvent::ConnectFailed`, where the cause
/// is always reported with `Code::Unavailable`.
#[derive(Debug)]
pub struct RpcError {
    code: Code,
    source: Error,
}

impl RpcError {
    pub fn new(code: Code, source: impl Into<Error>) -> Self {
        Self {
            code,
            source: source.into(),
        }
    }

    /// Construct the `unavailable` error used for every connect-phase
    /// failure.
    pub fn unavailable(source: impl Into<Error>) -> Self {
        Self::new(Code::Unavailable, source)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn source_ref(&self) -> &(dyn error::Error + Send + Sync + 'static) {
        &*self.source
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.source)
    }
}

impl error::Error for RpcError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Connection-level error, produced by the transport's own frame
/// processing rather than by user code (e.g. an `h2` stream error, an I/O
/// failure on the socket). Preserved verbatim as `firstError` in
/// `CloseReason::UnexpectedError`.
#[derive(Debug)]
pub struct TransportError(Error);

impl TransportError {
    pub fn from_source(source: impl Into<Error>) -> Self {
        Self(source.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl error::Error for TransportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

/// Fixed strings that are part of this crate's external contract:
/// callers may match on these to distinguish specific failure modes.
pub mod messages {
    pub const PREFACE_NEVER_ARRIVED: &str = "The server accepted the TCP connection but closed the connection before completing the HTTP/2 connection preface.";
    pub const TRANSPORT_SHUT_DOWN: &str = "Transport is shut down.";
    pub const TRANSPORT_SHUTTING_DOWN: &str = "Transport is shutting down.";
    pub const STREAM_UNEXPECTEDLY_CLOSED: &str = "Stream unexpectedly closed.";
    pub const STREAM_RESET: &str = "Stream unexpectedly closed: a RST_STREAM frame was received.";
}
