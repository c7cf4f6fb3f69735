//! The boundary between this crate and the HTTP/2 frame codec / stream
//! multiplexer it assumes is provided externally. The client and server
//! connection managers never touch a socket directly; instead they drive
//! and observe a `Multiplexer` / `ServerMultiplexer`, each a thin contract
//! over what an `h2::client::Connection` / `h2::server::Connection` (or a
//! test double) actually offers.
//!
//! `h2`'s own `Reason` and `StreamId` types are reused directly at this
//! boundary rather than redefined, since they're already the right shape
//! for these wire-level enums.

use crate::error::Error;
use async_trait::async_trait;
use h2::{Reason, StreamId};
use std::time::Duration;

/// One HTTP/2-level event the connection manager reacts to. Produced by the
/// underlying multiplexer in wire order.
#[derive(Debug)]
pub enum Http2Event {
    /// The peer's first SETTINGS frame arrived — the connection becomes
    /// "ready".
    SettingsReceived,
    /// A new stream was opened by the peer (server: client-initiated; not
    /// applicable to client-initiated streams on the client side).
    StreamOpened(StreamId),
    /// A previously open stream reached a terminal state.
    StreamClosed(StreamId),
    /// An inbound PING frame, `ack == false`.
    Ping { data: [u8; 8] },
    /// An inbound PING acknowledgement.
    PingAck { data: [u8; 8] },
    /// An inbound GOAWAY frame.
    GoAway { last_stream_id: StreamId, reason: Reason, debug_data: Vec<u8> },
    /// The connection died for a reason that isn't scoped to one stream.
    ConnectionError(Error),
    /// An error scoped to exactly one stream; never closes the connection.
    StreamError(StreamId, Error),
}

/// Outbound control-frame operations the connection manager issues against
/// the multiplexer. Kept as a trait (rather than a concrete `h2::SendStream`
/// wrapper) so state-machine tests can substitute a recording fake.
#[async_trait]
pub trait Multiplexer: Send {
    /// Send a GOAWAY with the given last-stream-id, reason, and optional
    /// debug payload.
    async fn send_go_away(&mut self, last_stream_id: StreamId, reason: Reason, debug_data: &[u8]) -> Result<(), Error>;

    /// Send a PING with the given 8-byte opaque payload. `ack` is false for
    /// pings this side originates.
    async fn send_ping(&mut self, data: [u8; 8]) -> Result<(), Error>;

    /// Acknowledge a peer-originated PING.
    async fn send_ping_ack(&mut self, data: [u8; 8]) -> Result<(), Error>;

    /// Reset a stream with the given reason.
    async fn send_reset(&mut self, stream_id: StreamId, reason: Reason) -> Result<(), Error>;

    /// Close the underlying transport (TCP/TLS) entirely. No further frames
    /// may be sent or received afterward.
    async fn close(&mut self) -> Result<(), Error>;

    /// Block until the next `Http2Event`. Returns `None` once the
    /// multiplexer itself has shut down with no further events pending.
    async fn next_event(&mut self) -> Option<Http2Event>;

    /// Client-only: open a new HTTP/2 stream for an RPC and send its
    /// request HEADERS. Message framing/body I/O on the returned stream is
    /// out of this crate's scope — the caller only needs the id to
    /// track it through `StreamOpened`/`StreamClosed` events.
    async fn open_stream(&mut self, request_headers: http::HeaderMap) -> Result<StreamId, Error>;
}

/// The client-side connector contract: given an `Endpoint`, produce a
/// ready-to-drive `Multiplexer` plus whatever scheme/ALPN information the
/// connection manager needs to report (peer strings are diagnostics only —
/// nothing here parses them back into a `SocketAddress`).
#[async_trait]
pub trait Connector: Send {
    type Conn: Multiplexer;

    async fn connect(&mut self, endpoint: &crate::Endpoint) -> Result<ConnectedTransport<Self::Conn>, Error>;
}

/// What a successful connect attempt hands back to the client connection
/// manager: the multiplexer plus the scheme and peer strings it reports
/// once connected.
pub struct ConnectedTransport<M> {
    pub multiplexer: M,
    pub scheme: &'static str,
    pub remote_peer: String,
    pub local_peer: String,
}

/// Request admission at the HTTP/2 layer, as seen by the server connection
/// manager: a server multiplexer additionally needs to open the second
/// GOAWAY's `lastStreamID` to "only the streams that were really open", so
/// it tracks the high-water mark itself.
#[async_trait]
pub trait ServerMultiplexer: Send {
    async fn send_go_away(&mut self, last_stream_id: StreamId, reason: Reason, debug_data: &[u8]) -> Result<(), Error>;
    async fn send_ping(&mut self, data: [u8; 8]) -> Result<(), Error>;
    async fn send_ping_ack(&mut self, data: [u8; 8]) -> Result<(), Error>;
    async fn send_reset(&mut self, stream_id: StreamId, reason: Reason) -> Result<(), Error>;
    async fn close(&mut self) -> Result<(), Error>;
    async fn next_event(&mut self) -> Option<Http2Event>;
}

/// Sleep abstraction reused so timer-driven code can be exercised under
/// `tokio::time::pause()` without depending on wall-clock time in tests.
pub fn sleep(duration: Duration) -> tokio::time::Sleep {
    tokio::time::sleep(duration)
}
