//! The server connection manager. Drives one accepted HTTP/2
//! connection through `Active -> Closing -> Closed`, including the
//! two-phase `GOAWAY` shutdown dance (gRFC A9) and keep-alive ping policing
//! (gRFC A8).

mod connection;
mod keepalive;

pub use connection::ServerHandle;
pub use keepalive::PingOutcome;
use keepalive::KeepaliveState;

use crate::error::{messages, TransportError};
use crate::timers::OneShotTimer;
use crate::transport::{Http2Event, ServerMultiplexer};
use h2::Reason;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, debug_span, trace, warn, Instrument};

/// The GOAWAY "last stream ID" value meaning "every stream the client may
/// ever open", used on the first GOAWAY of the two-phase shutdown.
const MAX_STREAM_ID: u32 = (1u32 << 31) - 1;

/// Every timer/keepalive/limit knob a server connection needs, collected
/// into one config struct.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_idle_time: Option<Duration>,
    pub max_age: Option<Duration>,
    pub max_grace_time: Option<Duration>,
    pub allow_keepalive_without_calls: bool,
    pub min_ping_receive_interval_without_calls: Duration,
    pub require_alpn: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_idle_time: None,
            max_age: None,
            max_grace_time: None,
            allow_keepalive_without_calls: false,
            min_ping_receive_interval_without_calls: Duration::from_secs(5 * 60),
            require_alpn: false,
        }
    }
}

impl ServerConfig {
    /// Start a graceful GOAWAY after this much time with no open streams.
    pub fn max_idle_time(self, max_idle: Duration) -> Self {
        ServerConfig { max_idle_time: Some(max_idle), ..self }
    }

    /// Start a graceful GOAWAY this long after the connection was accepted,
    /// regardless of activity.
    pub fn max_age(self, max_age: Duration) -> Self {
        ServerConfig { max_age: Some(max_age), ..self }
    }

    /// Force-close this long after a graceful GOAWAY began, if streams
    /// haven't quiesced on their own.
    pub fn max_grace_time(self, max_grace_time: Duration) -> Self {
        ServerConfig { max_grace_time: Some(max_grace_time), ..self }
    }

    /// Whether to accept keepalive PINGs even while no streams are open.
    pub fn allow_keepalive_without_calls(self, allow: bool) -> Self {
        ServerConfig { allow_keepalive_without_calls: allow, ..self }
    }

    /// The minimum interval between keepalive PINGs this server accepts
    /// without a ping-strike, while no streams are open.
    pub fn min_ping_receive_interval_without_calls(self, interval: Duration) -> Self {
        ServerConfig { min_ping_receive_interval_without_calls: interval, ..self }
    }

    /// Whether to reject connections that didn't negotiate ALPN.
    pub fn require_alpn(self, require: bool) -> Self {
        ServerConfig { require_alpn: require, ..self }
    }
}

pub(crate) enum Command {
    StartGracefulShutdown,
    /// Legitimate outbound activity (a HEADERS/DATA flush) clears keep-alive
    /// ping strikes, per gRFC A8.
    ResetKeepalive,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Phase {
    Active,
    Closing,
    Closed,
}

/// Why the connection reached `Closed`. Unlike the client's `CloseReason`,
/// the server has no documented precedence rule — the first cause
/// observed sticks.
#[derive(Debug)]
pub enum ServerCloseReason {
    UnexpectedError(TransportError),
    RemoteGoAway,
    GracefulShutdown,
    MaxAgeExpired,
    TooManyPings,
    AlpnRequiredButMissing,
    MaxGraceTimeExpired,
}

impl std::fmt::Display for ServerCloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerCloseReason::UnexpectedError(err) => write!(f, "unexpected transport error: {err}"),
            ServerCloseReason::RemoteGoAway => write!(f, "closed after client GOAWAY"),
            ServerCloseReason::GracefulShutdown => write!(f, "closed after graceful shutdown"),
            ServerCloseReason::MaxAgeExpired => write!(f, "closed after max connection age elapsed"),
            ServerCloseReason::TooManyPings => write!(f, "closed after too many keepalive pings (enhance_your_calm)"),
            ServerCloseReason::AlpnRequiredButMissing => write!(f, "closed: ALPN required but not negotiated"),
            ServerCloseReason::MaxGraceTimeExpired => write!(f, "force-closed after max grace time elapsed"),
        }
    }
}

/// Monotonic id assigned to each connection for log/span correlation; not
/// meaningful outside this process.
fn next_connection_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Owns one accepted HTTP/2 connection's lifecycle. The listener
/// (outside this crate's scope) hands over an already-connected
/// [`ServerMultiplexer`]; this type never dials or accepts sockets itself.
pub struct ServerConnectionManager<M: ServerMultiplexer> {
    mux: M,
    config: ServerConfig,
    negotiated_alpn: Option<&'static str>,
    commands_rx: mpsc::Receiver<Command>,
    connection_id: u64,
}

impl<M: ServerMultiplexer> ServerConnectionManager<M> {
    pub(crate) fn new(
        mux: M,
        config: ServerConfig,
        negotiated_alpn: Option<&'static str>,
        commands_rx: mpsc::Receiver<Command>,
    ) -> Self {
        ServerConnectionManager {
            mux,
            config,
            negotiated_alpn,
            commands_rx,
            connection_id: next_connection_id(),
        }
    }

    /// Drive the connection to completion. Returns once the connection is
    /// fully closed.
    pub async fn run(mut self) -> ServerCloseReason {
        let span = debug_span!("server_connection", connection_id = self.connection_id, alpn = self.negotiated_alpn.unwrap_or("none"));
        async move {
            if self.config.require_alpn && self.negotiated_alpn.is_none() {
                warn!("rejecting connection: ALPN required but not negotiated");
                let _ = self.mux.close().await;
                return ServerCloseReason::AlpnRequiredButMissing;
            }

            let mut state = ConnectedState::new(&self.config);
            let reason = self.drive(&mut state).await;

            let _ = self.mux.close().await;
            reason
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, state: &mut ConnectedState) -> ServerCloseReason {
        let mut phase = Phase::Active;
        let mut best_close: Option<ServerCloseReason> = None;
        let mut ready_to_close = false;

        loop {
            if ready_to_close {
                // Stream close after flush: give the handler's write
                // buffer one more scheduler tick to flush before we close.
                tokio::task::yield_now().await;
                break;
            }
            if phase == Phase::Closed {
                break;
            }

            tokio::select! {
                biased;

                Some(cmd) = self.commands_rx.recv() => {
                    match cmd {
                        Command::StartGracefulShutdown => {
                            if phase == Phase::Active {
                                self.start_graceful_shutdown(&mut phase, state).await;
                                note_close_cause(&mut best_close, ServerCloseReason::GracefulShutdown);
                            }
                        }
                        Command::ResetKeepalive => {
                            state.keepalive.reset();
                        }
                    }
                }

                Some(event) = self.mux.next_event() => {
                    match event {
                        Http2Event::SettingsReceived => {
                            if state.received_settings() {
                                debug!("server connection received first SETTINGS");
                                if state.open_streams.is_empty() {
                                    if let Some(max_idle) = self.config.max_idle_time {
                                        state.idle_timer.arm(max_idle);
                                    }
                                }
                            }
                        }
                        Http2Event::StreamOpened(id) => {
                            // Stream ids are monotonically increasing and
                            // never reused, so an id at or below the
                            // high-water mark means we already saw this
                            // stream's HEADERS once: a second HEADERS frame
                            // is a protocol violation, not a new stream.
                            if id.as_u32() <= state.last_stream_id {
                                let err = crate::error::Error::from(messages::STREAM_UNEXPECTEDLY_CLOSED);
                                warn!(stream_id = id.as_u32(), error = %err, "duplicate HEADERS on an already-opened stream id");
                                let _ = self.mux.send_reset(id, Reason::PROTOCOL_ERROR).await;
                            } else {
                                state.stream_opened(id);
                            }
                        }
                        Http2Event::StreamClosed(id) => {
                            state.stream_closed(id);
                            if phase == Phase::Closing && state.second_goaway_sent && state.open_streams.is_empty() {
                                ready_to_close = true;
                            }
                        }
                        Http2Event::Ping { data } => {
                            let any_open = !state.open_streams.is_empty();
                            match state.keepalive.received_ping(std::time::Instant::now(), any_open) {
                                PingOutcome::Accepted => {
                                    let _ = self.mux.send_ping_ack(data).await;
                                }
                                PingOutcome::Strike { count } => {
                                    trace!(count, "keepalive ping strike");
                                    let _ = self.mux.send_ping_ack(data).await;
                                }
                                PingOutcome::TooManyPings => {
                                    warn!("too many keepalive pings, sending enhance_your_calm");
                                    let last = h2::StreamId::from(state.last_stream_id);
                                    let _ = self.mux.send_go_away(last, Reason::ENHANCE_YOUR_CALM, b"too_many_pings").await;
                                    note_close_cause(&mut best_close, ServerCloseReason::TooManyPings);
                                    ready_to_close = true;
                                }
                            }
                        }
                        Http2Event::PingAck { data } => {
                            if phase == Phase::Closing && !state.second_goaway_sent && data == state.goaway_ping_data {
                                let last = h2::StreamId::from(state.last_stream_id);
                                let _ = self.mux.send_go_away(last, Reason::NO_ERROR, b"").await;
                                state.second_goaway_sent = true;
                                if state.open_streams.is_empty() {
                                    ready_to_close = true;
                                }
                            }
                        }
                        Http2Event::GoAway { .. } => {
                            note_close_cause(&mut best_close, ServerCloseReason::RemoteGoAway);
                            break;
                        }
                        Http2Event::StreamError(_, _) => {
                            // Stream-scoped errors never close the connection,
                            // including NoSuchStream races against shutdown.
                        }
                        Http2Event::ConnectionError(err) => {
                            note_close_cause(&mut best_close, ServerCloseReason::UnexpectedError(TransportError::from_source(err)));
                            break;
                        }
                    }
                }

                () = state.idle_timer.fired(), if phase == Phase::Active => {
                    debug!("server connection idle timeout elapsed");
                    self.start_graceful_shutdown(&mut phase, state).await;
                }

                () = state.age_timer.fired(), if phase == Phase::Active && state.age_timer.is_armed() => {
                    debug!("server connection max age elapsed");
                    note_close_cause(&mut best_close, ServerCloseReason::MaxAgeExpired);
                    self.start_graceful_shutdown(&mut phase, state).await;
                }

                () = state.grace_timer.fired(), if state.grace_timer.is_armed() => {
                    warn!("server connection max grace time elapsed, force-closing");
                    note_close_cause(&mut best_close, ServerCloseReason::MaxGraceTimeExpired);
                    break;
                }

                else => break,
            }
        }

        best_close.unwrap_or(ServerCloseReason::GracefulShutdown)
    }

    async fn start_graceful_shutdown(&mut self, phase: &mut Phase, state: &mut ConnectedState) {
        if *phase != Phase::Active {
            return;
        }
        *phase = Phase::Closing;
        state.idle_timer.cancel();
        state.age_timer.cancel();
        let max_id = h2::StreamId::from(MAX_STREAM_ID);
        let _ = self.mux.send_go_away(max_id, Reason::NO_ERROR, b"").await;
        let _ = self.mux.send_ping(state.goaway_ping_data).await;
        if let Some(grace) = state.max_grace_time {
            state.grace_timer.arm(grace);
        }
    }
}

fn note_close_cause(best: &mut Option<ServerCloseReason>, candidate: ServerCloseReason) {
    if best.is_none() {
        *best = Some(candidate);
    }
}

/// State kept for the lifetime of the connection: open streams, the
/// high-water stream id (for the second GOAWAY), keep-alive policing, and
/// the idle/age/grace timer trio.
struct ConnectedState {
    open_streams: HashSet<h2::StreamId>,
    last_stream_id: u32,
    received_preface: bool,
    idle_timer: OneShotTimer,
    age_timer: OneShotTimer,
    grace_timer: OneShotTimer,
    max_idle_time: Option<Duration>,
    max_grace_time: Option<Duration>,
    keepalive: KeepaliveState,
    goaway_ping_data: [u8; 8],
    second_goaway_sent: bool,
}

impl ConnectedState {
    fn new(config: &ServerConfig) -> Self {
        let mut age_timer = OneShotTimer::disarmed();
        if let Some(max_age) = config.max_age {
            age_timer.arm(max_age);
        }

        ConnectedState {
            open_streams: HashSet::new(),
            last_stream_id: 0,
            received_preface: false,
            idle_timer: OneShotTimer::disarmed(),
            age_timer,
            grace_timer: OneShotTimer::disarmed(),
            max_idle_time: config.max_idle_time,
            max_grace_time: config.max_grace_time,
            keepalive: KeepaliveState::new(
                config.allow_keepalive_without_calls,
                config.min_ping_receive_interval_without_calls,
            ),
            goaway_ping_data: goaway_ping_sentinel(),
            second_goaway_sent: false,
        }
    }

    fn received_settings(&mut self) -> bool {
        if self.received_preface {
            false
        } else {
            self.received_preface = true;
            true
        }
    }

    fn stream_opened(&mut self, id: h2::StreamId) {
        let was_empty = self.open_streams.is_empty();
        self.open_streams.insert(id);
        self.last_stream_id = self.last_stream_id.max(id.as_u32());
        if was_empty {
            self.idle_timer.cancel();
        }
    }

    fn stream_closed(&mut self, id: h2::StreamId) {
        self.open_streams.remove(&id);
        if self.open_streams.is_empty() {
            if let Some(max_idle) = self.max_idle_time {
                self.idle_timer.arm(max_idle);
            }
        }
    }
}

/// One sentinel payload per connection, used to recognize the PING ack that
/// completes phase one of the two-GOAWAY shutdown. A monotonic
/// counter is enough here: the value only needs to be unique within this
/// connection's lifetime, not unpredictable.
fn goaway_ping_sentinel() -> [u8; 8] {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0x1);
    COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn state_with(config: ServerConfig) -> ConnectedState {
        ConnectedState::new(&config)
    }

    #[test]
    fn received_settings_is_true_only_once() {
        let mut state = state_with(ServerConfig::default());
        assert!(state.received_settings());
        assert!(!state.received_settings());
    }

    #[test]
    fn stream_opened_tracks_high_water_mark() {
        let mut state = state_with(ServerConfig::default());
        state.stream_opened(h2::StreamId::from(1));
        state.stream_opened(h2::StreamId::from(5));
        state.stream_closed(h2::StreamId::from(5));
        assert_eq!(state.last_stream_id, 5);
    }

    #[test]
    fn stream_opened_cancels_idle_timer() {
        let config = ServerConfig { max_idle_time: Some(Duration::from_secs(30)), ..Default::default() };
        let mut state = state_with(config);
        state.idle_timer.arm(Duration::from_secs(30));
        state.stream_opened(h2::StreamId::from(1));
        assert!(!state.idle_timer.is_armed());
    }

    #[test]
    fn closing_last_stream_restarts_idle_timer() {
        let config = ServerConfig { max_idle_time: Some(Duration::from_secs(30)), ..Default::default() };
        let mut state = state_with(config);
        state.stream_opened(h2::StreamId::from(1));
        state.stream_closed(h2::StreamId::from(1));
        assert!(state.idle_timer.is_armed());
    }

    #[test]
    fn max_age_timer_arms_at_construction() {
        let config = ServerConfig { max_age: Some(Duration::from_secs(3600)), ..Default::default() };
        let state = state_with(config);
        assert!(state.age_timer.is_armed());
    }

    #[test]
    fn goaway_ping_sentinel_values_are_distinct() {
        let a = goaway_ping_sentinel();
        let b = goaway_ping_sentinel();
        assert_ne!(a, b);
    }

    #[test]
    fn first_close_cause_sticks() {
        let mut best = None;
        note_close_cause(&mut best, ServerCloseReason::MaxAgeExpired);
        note_close_cause(&mut best, ServerCloseReason::TooManyPings);
        assert!(matches!(best, Some(ServerCloseReason::MaxAgeExpired)));
    }

    #[test]
    fn builder_methods_set_the_expected_fields() {
        let config = ServerConfig::default()
            .max_idle_time(Duration::from_secs(30))
            .max_age(Duration::from_secs(3600))
            .max_grace_time(Duration::from_secs(10))
            .allow_keepalive_without_calls(true)
            .min_ping_receive_interval_without_calls(Duration::from_secs(30))
            .require_alpn(true);
        assert_eq!(config.max_idle_time, Some(Duration::from_secs(30)));
        assert_eq!(config.max_age, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_grace_time, Some(Duration::from_secs(10)));
        assert!(config.allow_keepalive_without_calls);
        assert_eq!(config.min_ping_receive_interval_without_calls, Duration::from_secs(30));
        assert!(config.require_alpn);
    }

    // A fake `ServerMultiplexer` recording outbound actions, driving `run()`
    // end to end under paused time.
    mod fakes {
        use crate::transport::{Http2Event, ServerMultiplexer};
        use async_trait::async_trait;
        use h2::Reason;
        use std::sync::{Arc, Mutex};
        use tokio::sync::mpsc;

        #[derive(Debug, Clone, PartialEq)]
        pub(super) enum Recorded {
            GoAway { last_stream_id: u32, reason: Reason, debug_data: Vec<u8> },
            Ping([u8; 8]),
            Reset(u32, Reason),
        }

        pub(super) struct FakeServerMux {
            events: mpsc::UnboundedReceiver<Http2Event>,
            recorded: Arc<Mutex<Vec<Recorded>>>,
        }

        impl FakeServerMux {
            pub(super) fn new(events: mpsc::UnboundedReceiver<Http2Event>, recorded: Arc<Mutex<Vec<Recorded>>>) -> Self {
                FakeServerMux { events, recorded }
            }
        }

        #[async_trait]
        impl ServerMultiplexer for FakeServerMux {
            async fn send_go_away(&mut self, last_stream_id: h2::StreamId, reason: Reason, debug_data: &[u8]) -> Result<(), crate::error::Error> {
                self.recorded.lock().unwrap().push(Recorded::GoAway {
                    last_stream_id: last_stream_id.as_u32(),
                    reason,
                    debug_data: debug_data.to_vec(),
                });
                Ok(())
            }

            async fn send_ping(&mut self, data: [u8; 8]) -> Result<(), crate::error::Error> {
                self.recorded.lock().unwrap().push(Recorded::Ping(data));
                Ok(())
            }

            async fn send_ping_ack(&mut self, _data: [u8; 8]) -> Result<(), crate::error::Error> {
                Ok(())
            }

            async fn send_reset(&mut self, stream_id: h2::StreamId, reason: Reason) -> Result<(), crate::error::Error> {
                self.recorded.lock().unwrap().push(Recorded::Reset(stream_id.as_u32(), reason));
                Ok(())
            }

            async fn close(&mut self) -> Result<(), crate::error::Error> {
                Ok(())
            }

            async fn next_event(&mut self) -> Option<Http2Event> {
                self.events.recv().await
            }
        }
    }

    use fakes::Recorded;

    // Covers the duplicate-HEADERS fix: a second `StreamOpened` at or below
    // the high-water mark resets the stream instead of being admitted.
    #[tokio::test]
    async fn duplicate_stream_id_is_reset_instead_of_admitted() {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mux = fakes::FakeServerMux::new(events_rx, recorded.clone());
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let manager = ServerConnectionManager::new(mux, ServerConfig::default(), None, commands_rx);

        let handle = tokio::spawn(manager.run());

        events_tx.send(Http2Event::StreamOpened(h2::StreamId::from(3))).unwrap();
        events_tx.send(Http2Event::StreamOpened(h2::StreamId::from(3))).unwrap();
        events_tx.send(Http2Event::StreamClosed(h2::StreamId::from(3))).unwrap();
        drop(events_tx);
        drop(commands_tx);

        handle.await.unwrap();

        let recorded = recorded.lock().unwrap();
        assert!(recorded.contains(&Recorded::Reset(3, Reason::PROTOCOL_ERROR)));
    }

    // Covers the keepalive-reset wiring: `Command::ResetKeepalive` clears
    // strikes on the running connection's `KeepaliveState`.
    #[tokio::test]
    async fn reset_keepalive_command_clears_strikes() {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mux = fakes::FakeServerMux::new(events_rx, recorded);
        let config = ServerConfig::default().allow_keepalive_without_calls(true).min_ping_receive_interval_without_calls(Duration::from_secs(60));
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let manager = ServerConnectionManager::new(mux, config, None, commands_rx);

        let handle = tokio::spawn(manager.run());
        commands_tx.send(Command::ResetKeepalive).await.unwrap();
        drop(commands_tx);
        drop(events_tx);

        // The manager exits once both its command and event channels close.
        let reason = handle.await.unwrap();
        assert!(matches!(reason, ServerCloseReason::GracefulShutdown));
    }
}
