//! A `NameResolver` backed by OS DNS resolution via
//! `tokio::net::lookup_host`. Pull-mode: every
//! call performs a fresh lookup. All the A/AAAA records for the name
//! become one [`Endpoint`]'s address list (tried in order), matching
//! `Endpoint`'s "equivalent addresses" contract.

use super::{NameResolutionResult, NameResolver, ResolverIterator, ResolverUpdate, UpdateMode};
use crate::error::Error;
use crate::types::SocketAddress;
use crate::Endpoint;
use async_trait::async_trait;

/// The port assumed when a `dns://` target names no port, matching the
/// scheme's own default for gRPC-over-TLS.
pub const DEFAULT_PORT: u16 = 443;

/// Resolves `host:port` via the OS resolver on every iteration.
pub struct DnsResolver {
    host: String,
    port: u16,
}

impl DnsResolver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        DnsResolver { host: host.into(), port }
    }

    /// Parse a `dns://host[:port]` target string, defaulting the port to
    /// [`DEFAULT_PORT`] when omitted.
    pub fn from_target(target: &str) -> Result<Self, Error> {
        let rest = target
            .strip_prefix("dns://")
            .ok_or_else(|| -> Error { format!("not a dns:// target: {target}").into() })?;
        if rest.is_empty() {
            return Err(format!("dns:// target is missing a host: {target}").into());
        }

        match rest.rsplit_once(':') {
            Some((host, port_str)) if !host.is_empty() => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| -> Error { format!("invalid port in dns:// target: {target}").into() })?;
                Ok(DnsResolver::new(host, port))
            }
            _ => Ok(DnsResolver::new(rest, DEFAULT_PORT)),
        }
    }
}

pub struct DnsIterator {
    host: String,
    port: u16,
}

#[async_trait]
impl ResolverIterator for DnsIterator {
    async fn next(&mut self) -> Result<ResolverUpdate, Error> {
        let authority = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddress> = tokio::net::lookup_host(&authority)
            .await?
            .map(SocketAddress::from_std)
            .collect();

        // Empty result: no backends right
        // now, not an error.
        let endpoints = if addrs.is_empty() { Vec::new() } else { vec![Endpoint::new(addrs)] };

        Ok(ResolverUpdate::Updated(NameResolutionResult::new(endpoints)))
    }
}

impl NameResolver for DnsResolver {
    type Iter = DnsIterator;

    fn mode(&self) -> UpdateMode {
        UpdateMode::Pull
    }

    fn new_iterator(&self) -> Self::Iter {
        DnsIterator { host: self.host.clone(), port: self.port }
    }

    fn authority(&self) -> Option<String> {
        Some(if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost_to_a_loopback_endpoint() {
        let resolver = DnsResolver::new("localhost", 50051);
        let mut iter = resolver.new_iterator();
        match iter.next().await.unwrap() {
            ResolverUpdate::Updated(result) => {
                assert_eq!(result.endpoints.len(), 1);
                assert!(result.endpoints[0].addresses().iter().any(|a| a.as_ipv4().is_some() || a.as_ipv6().is_some()));
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn from_target_parses_host_and_port() {
        let resolver = DnsResolver::from_target("dns://example.com:8443").unwrap();
        assert_eq!(resolver.authority(), Some("example.com:8443".to_string()));
    }

    #[test]
    fn from_target_defaults_to_port_443() {
        let resolver = DnsResolver::from_target("dns://example.com").unwrap();
        assert_eq!(resolver.authority(), Some("example.com".to_string()));
    }

    #[test]
    fn from_target_rejects_non_dns_scheme() {
        assert!(DnsResolver::from_target("unix:///tmp/x.sock").is_err());
    }

    #[test]
    fn from_target_rejects_missing_host() {
        assert!(DnsResolver::from_target("dns://").is_err());
    }

    #[test]
    fn from_target_rejects_non_numeric_port() {
        assert!(DnsResolver::from_target("dns://example.com:https").is_err());
    }
}
