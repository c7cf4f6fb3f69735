//! The client connection manager. Drives one outbound HTTP/2
//! connection through `NotConnected -> Connected -> Closing -> Closed`,
//! including keep-alive ping policing, the idle timer, and
//! translating inbound `GOAWAY` into the client's half of the shutdown
//! protocol.

mod connection;

pub use connection::{Connection, Stream};

use crate::error::{messages, RpcError, TransportError};
use crate::timers::{OneShotTimer, RepeatingTimer};
use crate::transport::{Connector, Http2Event, Multiplexer};
use crate::types::{CloseReason, ConnectionEvent};
use crate::Endpoint;
use h2::Reason;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, debug_span, trace, warn, Instrument};

/// Every timer/keepalive knob a client connection needs, collected into
/// one config struct.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub keepalive_time: Option<Duration>,
    pub keepalive_timeout: Duration,
    pub allow_keepalive_without_calls: bool,
    pub max_idle_time: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            keepalive_time: None,
            keepalive_timeout: Duration::from_secs(20),
            allow_keepalive_without_calls: false,
            max_idle_time: None,
        }
    }
}

impl ClientConfig {
    /// Send HTTP/2 keepalive PINGs on this interval while the connection is
    /// otherwise idle-eligible for them (see `allow_keepalive_without_calls`).
    pub fn keepalive_time(self, interval: Duration) -> Self {
        ClientConfig { keepalive_time: Some(interval), ..self }
    }

    /// How long to wait for a keepalive PING's ack before treating the
    /// connection as dead.
    pub fn keepalive_timeout(self, timeout: Duration) -> Self {
        ClientConfig { keepalive_timeout: timeout, ..self }
    }

    /// Whether keepalive PINGs are sent even while no streams are open.
    pub fn allow_keepalive_without_calls(self, allow: bool) -> Self {
        ClientConfig { allow_keepalive_without_calls: allow, ..self }
    }

    /// Start a graceful GOAWAY after this much time with no open streams.
    pub fn max_idle_time(self, max_idle: Duration) -> Self {
        ClientConfig { max_idle_time: Some(max_idle), ..self }
    }
}

pub(crate) enum Command {
    Close,
    OpenStream {
        request_headers: http::HeaderMap,
        reply: oneshot::Sender<Result<Stream, RpcError>>,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum Phase {
    NotConnected,
    Connected,
    Closing,
    Closed,
}

/// Owns one HTTP/2 channel's lifecycle. Constructed with a `Connector`
/// it will use exactly once, and run via [`ClientConnectionManager::run`]
/// on a dedicated task (see [`Connection`] for the one-shot facade most
/// callers should use instead of driving this directly).
pub struct ClientConnectionManager<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    config: ClientConfig,
    events_tx: mpsc::Sender<ConnectionEvent>,
    commands_rx: mpsc::Receiver<Command>,
}

impl<C: Connector> ClientConnectionManager<C> {
    pub(crate) fn new(
        connector: C,
        endpoint: Endpoint,
        config: ClientConfig,
        events_tx: mpsc::Sender<ConnectionEvent>,
        commands_rx: mpsc::Receiver<Command>,
    ) -> Self {
        ClientConnectionManager {
            connector,
            endpoint,
            config,
            events_tx,
            commands_rx,
        }
    }

    /// Drive the connection to completion. Returns once a terminal event
    /// has been emitted (`ConnectFailed` or `Closed`).
    pub async fn run(mut self) {
        let authority = self.endpoint.canonical_authority();
        let span = debug_span!("client_connection", %authority, remote_addr = tracing::field::Empty);
        async move {
            let connected = match self.connector.connect(&self.endpoint).await {
                Ok(c) => c,
                Err(err) => {
                    let _ = self
                        .events_tx
                        .send(ConnectionEvent::ConnectFailed(RpcError::unavailable(err)))
                        .await;
                    return;
                }
            };
            let mut mux = connected.multiplexer;
            tracing::Span::current().record("remote_addr", tracing::field::display(&connected.remote_peer));
            debug!(local_addr = %connected.local_peer, "dialed");

            // Readiness rule: connect succeeding is not enough, we need
            // the peer's first SETTINGS frame.
            loop {
                match mux.next_event().await {
                    Some(Http2Event::SettingsReceived) => break,
                    Some(Http2Event::ConnectionError(err)) | None => {
                        let err = err_or_preface_missing(None);
                        let _ = self
                            .events_tx
                            .send(ConnectionEvent::ConnectFailed(RpcError::unavailable(err)))
                            .await;
                        return;
                    }
                    Some(_) => continue,
                }
            }

            let _ = self.events_tx.send(ConnectionEvent::ConnectSucceeded).await;
            debug!(remote_addr = %connected.remote_peer, "client connection ready (first SETTINGS received)");

            let mut state = ConnectedState::new(&self.config);
            let reason = self.drive_connected(&mut mux, &mut state).await;

            let _ = mux.close().await;
            let _ = self.events_tx.send(ConnectionEvent::Closed(reason)).await;
        }
        .instrument(span)
        .await
    }

    async fn drive_connected(
        &mut self,
        mux: &mut C::Conn,
        state: &mut ConnectedState,
    ) -> CloseReason {
        let mut phase = Phase::Connected;
        let mut best_close: Option<CloseReason> = None;
        let mut graceful_goaway_sent = false;

        loop {
            if phase == Phase::Closing && state.open_streams.is_empty() {
                // Streams have quiesced; we can finish closing.
                break;
            }

            tokio::select! {
                biased;

                Some(cmd) = self.commands_rx.recv() => {
                    match cmd {
                        Command::Close => {
                            self.note_close_cause(&mut best_close, CloseReason::InitiatedLocally);
                            if !graceful_goaway_sent {
                                let last = h2::StreamId::from(state.last_stream_id);
                                let _ = mux.send_go_away(last, Reason::NO_ERROR, b"").await;
                                graceful_goaway_sent = true;
                            }
                            phase = Phase::Closing;
                            if state.open_streams.is_empty() {
                                break;
                            }
                        }
                        Command::OpenStream { request_headers, reply } => {
                            if phase != Phase::Connected {
                                let _ = reply.send(Err(RpcError::unavailable(messages::TRANSPORT_SHUT_DOWN)));
                                continue;
                            }
                            match mux.open_stream(request_headers).await {
                                Ok(id) => {
                                    state.stream_opened(id);
                                    let _ = reply.send(Ok(Stream::new(id)));
                                }
                                Err(err) => {
                                    let _ = reply.send(Err(RpcError::unavailable(err)));
                                }
                            }
                        }
                    }
                }

                Some(event) = mux.next_event() => {
                    match event {
                        Http2Event::StreamOpened(id) => state.stream_opened(id),
                        Http2Event::StreamClosed(id) => state.stream_closed(id),
                        Http2Event::Ping { data } => {
                            let _ = mux.send_ping_ack(data).await;
                        }
                        Http2Event::PingAck { data } => {
                            state.on_keepalive_ack(data);
                        }
                        Http2Event::GoAway { reason, debug_data, .. } => {
                            let msg = String::from_utf8_lossy(&debug_data).into_owned();
                            if reason == Reason::NO_ERROR {
                                let _ = self.events_tx.send(ConnectionEvent::GoingAway {
                                    http2_code: reason,
                                    message: msg,
                                }).await;
                                self.note_close_cause(&mut best_close, CloseReason::Remote);
                                if !graceful_goaway_sent {
                                    let last = h2::StreamId::from(state.last_stream_id);
                                    let _ = mux.send_go_away(last, Reason::NO_ERROR, b"").await;
                                    graceful_goaway_sent = true;
                                }
                                phase = Phase::Closing;
                                if state.open_streams.is_empty() {
                                    break;
                                }
                            } else {
                                // Non-NO_ERROR GOAWAY upgrades to a hard close
                                // immediately, even if we were already closing
                                // gracefully.
                                let _ = self.events_tx.send(ConnectionEvent::GoingAway {
                                    http2_code: reason,
                                    message: msg,
                                }).await;
                                self.note_close_cause(&mut best_close, CloseReason::Remote);
                                break;
                            }
                        }
                        Http2Event::StreamError(_, _) => {
                            // Per-stream errors never affect connection state.
                        }
                        Http2Event::ConnectionError(err) => {
                            state.note_first_error(err);
                            self.note_close_cause(&mut best_close, CloseReason::UnexpectedError {
                                source: TransportError::from_source(state.take_first_error()),
                                was_idle: state.open_streams.is_empty(),
                            });
                            break;
                        }
                    }
                }

                () = state.idle_timer.fired(), if phase == Phase::Connected => {
                    debug!("client connection idle timeout elapsed");
                    self.note_close_cause(&mut best_close, CloseReason::IdleTimeout);
                    let last = h2::StreamId::from(state.last_stream_id);
                    let _ = mux.send_go_away(last, Reason::NO_ERROR, b"idle").await;
                    graceful_goaway_sent = true;
                    phase = Phase::Closing;
                    if state.open_streams.is_empty() {
                        break;
                    }
                }

                () = state.keepalive_ticker.tick(), if state.keepalive_ticker.is_running() => {
                    let data = state.new_keepalive_ping();
                    trace!("sending client keepalive PING");
                    let _ = mux.send_ping(data).await;
                    state.keepalive_timeout.arm(self.config.keepalive_timeout);
                }

                () = state.keepalive_timeout.fired(), if state.keepalive_timeout.is_armed() => {
                    warn!("client keepalive ping timed out");
                    self.note_close_cause(&mut best_close, CloseReason::KeepaliveTimeout);
                    let last = h2::StreamId::from(state.last_stream_id);
                    let _ = mux.send_go_away(last, Reason::NO_ERROR, b"keepalive_expired").await;
                    graceful_goaway_sent = true;
                    phase = Phase::Closing;
                    if state.open_streams.is_empty() {
                        break;
                    }
                }

                else => break,
            }
        }

        best_close.unwrap_or(CloseReason::InitiatedLocally)
    }

    fn note_close_cause(&self, best: &mut Option<CloseReason>, candidate: CloseReason) {
        let replace = match best {
            None => true,
            Some(existing) => candidate.precedence() > existing.precedence(),
        };
        if replace {
            *best = Some(candidate);
        }
    }
}

fn err_or_preface_missing(err: Option<crate::error::Error>) -> crate::error::Error {
    err.unwrap_or_else(|| messages::PREFACE_NEVER_ARRIVED.into())
}

/// State kept only while `Connected`/`Closing`: open streams, the
/// high-water stream id (for an outbound GOAWAY's `lastStreamID`), and the
/// idle/keepalive timer set driven by them.
struct ConnectedState {
    open_streams: HashSet<h2::StreamId>,
    last_stream_id: u32,
    idle_timer: OneShotTimer,
    keepalive_ticker: RepeatingTimer,
    keepalive_timeout: OneShotTimer,
    allow_keepalive_without_calls: bool,
    max_idle_time: Option<Duration>,
    next_ping_payload: u64,
    outstanding_ping: Option<[u8; 8]>,
    first_error: Option<crate::error::Error>,
}

impl ConnectedState {
    fn new(config: &ClientConfig) -> Self {
        let mut state = ConnectedState {
            open_streams: HashSet::new(),
            last_stream_id: 0,
            idle_timer: OneShotTimer::disarmed(),
            keepalive_ticker: RepeatingTimer::new(config.keepalive_time.unwrap_or(Duration::from_secs(u64::MAX))),
            keepalive_timeout: OneShotTimer::disarmed(),
            allow_keepalive_without_calls: config.allow_keepalive_without_calls,
            max_idle_time: config.max_idle_time,
            next_ping_payload: 1,
            outstanding_ping: None,
            first_error: None,
        };

        if let Some(max_idle) = state.max_idle_time {
            state.idle_timer.arm(max_idle);
        }
        if config.keepalive_time.is_some() && config.allow_keepalive_without_calls {
            state.keepalive_ticker.start();
        }

        state
    }

    fn stream_opened(&mut self, id: h2::StreamId) {
        let was_empty = self.open_streams.is_empty();
        self.open_streams.insert(id);
        self.last_stream_id = self.last_stream_id.max(id.as_u32());
        if was_empty {
            self.idle_timer.cancel();
            if !self.keepalive_ticker.is_running() {
                self.keepalive_ticker.start();
            }
        }
    }

    fn stream_closed(&mut self, id: h2::StreamId) {
        self.open_streams.remove(&id);
        if self.open_streams.is_empty() {
            if let Some(max_idle) = self.max_idle_time {
                self.idle_timer.arm(max_idle);
            }
            if !self.allow_keepalive_without_calls {
                self.keepalive_ticker.stop();
                self.keepalive_timeout.cancel();
            }
        }
    }

    fn new_keepalive_ping(&mut self) -> [u8; 8] {
        let payload = self.next_ping_payload.to_be_bytes();
        self.next_ping_payload = self.next_ping_payload.wrapping_add(1);
        self.outstanding_ping = Some(payload);
        payload
    }

    fn on_keepalive_ack(&mut self, data: [u8; 8]) {
        if self.outstanding_ping == Some(data) {
            self.outstanding_ping = None;
            self.keepalive_timeout.cancel();
        }
    }

    fn note_first_error(&mut self, err: crate::error::Error) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    fn take_first_error(&mut self) -> crate::error::Error {
        self.first_error.take().unwrap_or_else(|| "unexpected transport error".into())
    }
}
