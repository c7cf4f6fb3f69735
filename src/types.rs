//! Shared value types: addresses, endpoints, and the client's lifecycle
//! event/close-reason vocabulary.

use crate::error::{RpcError, TransportError};
use std::fmt;
use std::net::IpAddr;

/// A single transport-level address. One tagged union covering every
/// address family this core understands; accessors return `None` rather
/// than panicking for the non-matching variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    Ipv4 { host: [u8; 4], port: u16 },
    Ipv6 { host: [u8; 16], port: u16, scope_id: Option<u32> },
    UnixDomainSocket { path: String },
    VirtualSocket { context_id: u32, port: u32 },
}

impl SocketAddress {
    pub fn ipv4(ip: std::net::Ipv4Addr, port: u16) -> Self {
        SocketAddress::Ipv4 { host: ip.octets(), port }
    }

    pub fn ipv6(ip: std::net::Ipv6Addr, port: u16, scope_id: Option<u32>) -> Self {
        SocketAddress::Ipv6 { host: ip.octets(), port, scope_id }
    }

    pub fn from_std(addr: std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(v4) => Self::ipv4(*v4.ip(), v4.port()),
            std::net::SocketAddr::V6(v6) => Self::ipv6(*v6.ip(), v6.port(), Some(v6.scope_id())),
        }
    }

    pub fn as_ipv4(&self) -> Option<(std::net::Ipv4Addr, u16)> {
        match self {
            SocketAddress::Ipv4 { host, port } => Some((std::net::Ipv4Addr::from(*host), *port)),
            _ => None,
        }
    }

    pub fn as_ipv6(&self) -> Option<(std::net::Ipv6Addr, u16, Option<u32>)> {
        match self {
            SocketAddress::Ipv6 { host, port, scope_id } => {
                Some((std::net::Ipv6Addr::from(*host), *port, *scope_id))
            }
            _ => None,
        }
    }

    pub fn as_uds(&self) -> Option<&str> {
        match self {
            SocketAddress::UnixDomainSocket { path } => Some(path),
            _ => None,
        }
    }

    pub fn as_vsock(&self) -> Option<(u32, u32)> {
        match self {
            SocketAddress::VirtualSocket { context_id, port } => Some((*context_id, *port)),
            _ => None,
        }
    }

    /// The canonical `host:port` / `[ipv6]:port` / path form used to derive
    /// `:authority` and (for TLS) the SNI hostname.
    pub fn canonical_authority(&self) -> String {
        match self {
            SocketAddress::Ipv4 { host, port } => {
                format!("{}:{}", IpAddr::from(*host), port)
            }
            SocketAddress::Ipv6 { host, port, .. } => {
                format!("[{}]:{}", IpAddr::from(*host), port)
            }
            SocketAddress::UnixDomainSocket { path } => path.clone(),
            SocketAddress::VirtualSocket { context_id, port } => {
                format!("vsock:{context_id}:{port}")
            }
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_authority())
    }
}

/// An ordered sequence of equivalent addresses, tried in order when
/// connecting (e.g. the A/AAAA records for one DNS name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    addresses: Vec<SocketAddress>,
}

impl Endpoint {
    pub fn new(addresses: Vec<SocketAddress>) -> Self {
        assert!(!addresses.is_empty(), "an Endpoint must have at least one address");
        Self { addresses }
    }

    pub fn single(address: SocketAddress) -> Self {
        Self::new(vec![address])
    }

    pub fn addresses(&self) -> &[SocketAddress] {
        &self.addresses
    }

    /// The authority derived from the first address, used unless the
    /// resolver or the user overrides it.
    pub fn canonical_authority(&self) -> String {
        self.addresses[0].canonical_authority()
    }
}

/// Tagged union of lifecycle events delivered, in order, over a client
/// connection's single-reader event stream: exactly one terminal event
/// (`ConnectFailed` or `Closed`), then the stream closes.
#[derive(Debug)]
pub enum ConnectionEvent {
    ConnectSucceeded,
    ConnectFailed(RpcError),
    GoingAway { http2_code: h2::Reason, message: String },
    Closed(CloseReason),
}

/// Why a client connection reached `Closed`. Ordered by shutdown
/// precedence; `Ord` follows declaration order
/// here only incidentally — use [`CloseReason::precedence`] for the actual
/// comparison, since `UnexpectedError` carries data and can't derive `Ord`.
#[derive(Debug)]
pub enum CloseReason {
    UnexpectedError { source: TransportError, was_idle: bool },
    Remote,
    IdleTimeout,
    KeepaliveTimeout,
    InitiatedLocally,
}

impl CloseReason {
    /// `unexpectedError (-1) < goAway (0) < idle (1) < keepaliveExpired (2)
    /// < initiatedLocally (3)`.
    pub fn precedence(&self) -> i32 {
        match self {
            CloseReason::UnexpectedError { .. } => -1,
            CloseReason::Remote => 0,
            CloseReason::IdleTimeout => 1,
            CloseReason::KeepaliveTimeout => 2,
            CloseReason::InitiatedLocally => 3,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::UnexpectedError { source, was_idle } => {
                write!(f, "unexpected transport error (was_idle={was_idle}): {source}")
            }
            CloseReason::Remote => write!(f, "closed by remote GOAWAY"),
            CloseReason::IdleTimeout => write!(f, "closed after max idle time elapsed"),
            CloseReason::KeepaliveTimeout => write!(f, "closed after keepalive ping timed out"),
            CloseReason::InitiatedLocally => write!(f, "closed locally"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_ordering_matches_spec() {
        let unexpected = CloseReason::UnexpectedError { source: TransportError::from_source("boom"), was_idle: true };
        assert!(unexpected.precedence() < CloseReason::Remote.precedence());
        assert!(CloseReason::Remote.precedence() < CloseReason::IdleTimeout.precedence());
        assert!(CloseReason::IdleTimeout.precedence() < CloseReason::KeepaliveTimeout.precedence());
        assert!(CloseReason::KeepaliveTimeout.precedence() < CloseReason::InitiatedLocally.precedence());
    }

    #[test]
    fn endpoint_authority_ipv4() {
        let ep = Endpoint::single(SocketAddress::ipv4(std::net::Ipv4Addr::new(10, 0, 0, 1), 443));
        assert_eq!(ep.canonical_authority(), "10.0.0.1:443");
    }

    #[test]
    fn endpoint_authority_uds() {
        let ep = Endpoint::single(SocketAddress::UnixDomainSocket { path: "/tmp/foo.sock".into() });
        assert_eq!(ep.canonical_authority(), "/tmp/foo.sock");
    }

    #[test]
    fn accessors_return_none_for_mismatched_variant() {
        let addr = SocketAddress::UnixDomainSocket { path: "/tmp/x".into() };
        assert!(addr.as_ipv4().is_none());
        assert!(addr.as_ipv6().is_none());
        assert!(addr.as_vsock().is_none());
    }
}
