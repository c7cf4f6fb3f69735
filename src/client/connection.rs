//! The one-shot `Connection` facade most callers use instead of driving
//! [`super::ClientConnectionManager`] directly — `run()`, `close()`,
//! `make_stream()`, and the event stream.

use super::{ClientConfig, ClientConnectionManager, Command};
use crate::error::RpcError;
use crate::transport::Connector;
use crate::types::ConnectionEvent;
use crate::Endpoint;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const EVENTS_CHANNEL_CAPACITY: usize = 16;
const COMMANDS_CHANNEL_CAPACITY: usize = 16;

/// A handle to one RPC stream opened through [`Connection::make_stream`].
/// Message (de)serialization and body framing are out of this crate's
/// scope; this handle only carries the identity needed to track the
/// stream through the connection's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    id: h2::StreamId,
}

impl Stream {
    pub(crate) fn new(id: h2::StreamId) -> Self {
        Stream { id }
    }

    pub fn id(&self) -> h2::StreamId {
        self.id
    }
}

/// A single-consumer stream of [`ConnectionEvent`]s. Produces events in
/// order and terminates after exactly one of `ConnectFailed`/`Closed`.
pub struct Events {
    rx: tokio_stream::wrappers::ReceiverStream<ConnectionEvent>,
}

impl Events {
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        tokio_stream::StreamExt::next(&mut self.rx).await
    }
}

/// Spawns a [`ClientConnectionManager`] on its own task and exposes the
/// narrow operation set a caller needs: `make_stream`, `close`, and the
/// event stream. Consuming this type (via `run`) is optional; most callers
/// will call [`Connection::connect`] and let it spawn `run()` itself.
pub struct Connection {
    commands_tx: mpsc::Sender<Command>,
    handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Build a manager for `endpoint` and spawn its `run()` loop. Returns
    /// immediately; the first event on the returned [`Events`] will be
    /// either `ConnectSucceeded` or `ConnectFailed`.
    pub fn connect<C>(connector: C, endpoint: Endpoint, config: ClientConfig) -> (Self, Events)
    where
        C: Connector + 'static,
    {
        debug!(authority = %endpoint.canonical_authority(), "connecting");
        let (events_tx, events_rx) = mpsc::channel(EVENTS_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMANDS_CHANNEL_CAPACITY);

        let manager = ClientConnectionManager::new(connector, endpoint, config, events_tx, commands_rx);
        let handle = tokio::spawn(manager.run());

        (Connection { commands_tx, handle }, Events { rx: tokio_stream::wrappers::ReceiverStream::new(events_rx) })
    }

    /// Enqueue a graceful-close request. Idempotent: calling this more than
    /// once, or after the connection is already closing, is a no-op (the
    /// channel send silently fails once the manager has stopped reading
    /// commands).
    pub async fn close(&self) {
        debug!("closing connection");
        let _ = self.commands_tx.send(Command::Close).await;
    }

    /// Open a new stream for an RPC. Fails with `unavailable` unless the
    /// connection is `Connected`.
    pub async fn make_stream(&self, request_headers: http::HeaderMap) -> Result<Stream, RpcError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands_tx
            .send(Command::OpenStream { request_headers, reply: reply_tx })
            .await
            .map_err(|_| RpcError::unavailable(crate::error::messages::TRANSPORT_SHUT_DOWN))?;

        let stream = reply_rx
            .await
            .map_err(|_| RpcError::unavailable(crate::error::messages::TRANSPORT_SHUTTING_DOWN))?;
        debug!(ok = stream.is_ok(), "stream requested");
        stream
    }

    /// Wait for the manager's `run()` task to finish. Useful in tests and
    /// graceful-shutdown sequences that want to know the socket is gone.
    pub async fn closed(self) {
        let _ = self.handle.await;
        debug!("connection task finished");
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Connection: Send);
#[cfg(test)]
static_assertions::assert_impl_all!(Events: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_exposes_its_id() {
        let s = Stream::new(h2::StreamId::from(3));
        assert_eq!(s.id(), h2::StreamId::from(3));
    }
}
