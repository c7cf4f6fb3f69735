//! The one-shot facade most listener loops use instead of driving
//! [`super::ServerConnectionManager`] directly, mirroring
//! [`crate::client::Connection`]'s operations accessed from outside
//! the connection's own task.

use super::{Command, ServerCloseReason, ServerConfig, ServerConnectionManager};
use crate::error::TransportError;
use crate::stream::ConnectionActivity;
use crate::transport::ServerMultiplexer;
use async_trait::async_trait;
use tracing::debug;

const COMMANDS_CHANNEL_CAPACITY: usize = 4;

/// A handle to a spawned [`ServerConnectionManager`]. Dropping this handle
/// does not close the connection; call [`ServerHandle::start_graceful_shutdown`]
/// or simply let the manager's own timers/policing drive it to completion.
pub struct ServerHandle {
    commands_tx: tokio::sync::mpsc::Sender<Command>,
    handle: tokio::task::JoinHandle<ServerCloseReason>,
}

impl ServerHandle {
    /// Spawn a manager for an already-accepted connection and return
    /// immediately; `negotiated_alpn` should be `None` unless TLS/ALPN
    /// negotiation actually ran.
    pub fn spawn<M>(mux: M, config: ServerConfig, negotiated_alpn: Option<&'static str>) -> Self
    where
        M: ServerMultiplexer + 'static,
    {
        let (commands_tx, commands_rx) = tokio::sync::mpsc::channel(COMMANDS_CHANNEL_CAPACITY);
        let manager = ServerConnectionManager::new(mux, config, negotiated_alpn, commands_rx);
        debug!(alpn = negotiated_alpn.unwrap_or("none"), "spawning connection manager");
        let handle = tokio::spawn(manager.run());
        ServerHandle { commands_tx, handle }
    }

    /// Enqueue `start_graceful_shutdown()`. Idempotent: a no-op once
    /// the manager has stopped reading commands.
    pub async fn start_graceful_shutdown(&self) {
        debug!("graceful shutdown requested");
        let _ = self.commands_tx.send(Command::StartGracefulShutdown).await;
    }

    /// An activity handle for the streams this connection hands out,
    /// reporting every write flush back to reset keep-alive ping strikes.
    pub fn activity_handle(&self) -> ServerActivityHandle {
        ServerActivityHandle { commands_tx: self.commands_tx.clone() }
    }

    /// Wait for the connection to fully close and report why.
    pub async fn closed(self) -> ServerCloseReason {
        let reason = self
            .handle
            .await
            .unwrap_or(ServerCloseReason::UnexpectedError(TransportError::from_source("server task panicked")));
        debug!(?reason, "connection closed");
        reason
    }
}

/// [`ConnectionActivity`] implementation handed to [`crate::stream::StreamWriter`]s
/// spawned on this connection: a write flush becomes a [`Command::ResetKeepalive`].
#[derive(Clone)]
pub struct ServerActivityHandle {
    commands_tx: tokio::sync::mpsc::Sender<Command>,
}

#[async_trait]
impl ConnectionActivity for ServerActivityHandle {
    async fn note_write_flushed(&self) {
        let _ = self.commands_tx.send(Command::ResetKeepalive).await;
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(ServerHandle: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activity_handle_note_write_flushed_sends_reset_keepalive() {
        let (commands_tx, mut commands_rx) = tokio::sync::mpsc::channel(1);
        let handle = ServerActivityHandle { commands_tx };
        handle.note_write_flushed().await;
        assert!(matches!(commands_rx.recv().await, Some(Command::ResetKeepalive)));
    }
}
