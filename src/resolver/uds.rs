//! A `NameResolver` around a single Unix domain socket path. Pull-mode,
//! never errors, resolves to one endpoint forever. The authority defaults
//! to the socket path unless the caller overrides it.

use super::{NameResolutionResult, NameResolver, ResolverIterator, ResolverUpdate, UpdateMode};
use crate::error::Error;
use crate::types::SocketAddress;
use crate::Endpoint;
use async_trait::async_trait;

pub struct UdsResolver {
    path: String,
    authority: Option<String>,
}

impl UdsResolver {
    pub fn new(path: impl Into<String>) -> Self {
        UdsResolver { path: path.into(), authority: None }
    }

    /// Override the `:authority`/SNI hostname reported for this resolver,
    /// instead of falling back to the socket path itself.
    pub fn with_authority(path: impl Into<String>, authority: impl Into<String>) -> Self {
        UdsResolver { path: path.into(), authority: Some(authority.into()) }
    }
}

pub struct UdsIterator {
    endpoint: Endpoint,
}

#[async_trait]
impl ResolverIterator for UdsIterator {
    async fn next(&mut self) -> Result<ResolverUpdate, Error> {
        Ok(ResolverUpdate::Updated(NameResolutionResult::new(vec![self.endpoint.clone()])))
    }
}

impl NameResolver for UdsResolver {
    type Iter = UdsIterator;

    fn mode(&self) -> UpdateMode {
        UpdateMode::Pull
    }

    fn new_iterator(&self) -> Self::Iter {
        let endpoint = Endpoint::single(SocketAddress::UnixDomainSocket { path: self.path.clone() });
        UdsIterator { endpoint }
    }

    fn authority(&self) -> Option<String> {
        Some(self.authority.clone().unwrap_or_else(|| self.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_to_one_uds_endpoint() {
        let resolver = UdsResolver::new("/tmp/my.sock");
        let mut iter = resolver.new_iterator();
        match iter.next().await.unwrap() {
            ResolverUpdate::Updated(result) => {
                assert_eq!(result.endpoints.len(), 1);
                assert_eq!(result.endpoints[0].canonical_authority(), "/tmp/my.sock");
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn authority_defaults_to_the_socket_path() {
        let resolver = UdsResolver::new("/tmp/my.sock");
        assert_eq!(resolver.authority(), Some("/tmp/my.sock".to_string()));
    }

    #[test]
    fn authority_override_is_reported_instead() {
        let resolver = UdsResolver::with_authority("/tmp/my.sock", "my-service.local");
        assert_eq!(resolver.authority(), Some("my-service.local".to_string()));
    }
}
