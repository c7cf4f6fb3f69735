//! A `NameResolver` around a fixed, caller-supplied endpoint list. Always
//! pull-mode, never errors.

use super::{NameResolutionResult, NameResolver, ResolverIterator, ResolverUpdate, UpdateMode};
use crate::error::Error;
use crate::Endpoint;
use async_trait::async_trait;

/// Resolves to the same, never-changing set of endpoints every time.
/// Useful for tests and for addresses that are already fully resolved
/// (e.g. passed in by the caller instead of a DNS name).
pub struct StaticResolver {
    endpoints: Vec<Endpoint>,
    authority: Option<String>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        StaticResolver { endpoints, authority: None }
    }

    /// Override the `:authority`/SNI hostname reported for this resolver,
    /// instead of falling back to the first endpoint's canonical authority.
    pub fn with_authority(endpoints: Vec<Endpoint>, authority: impl Into<String>) -> Self {
        StaticResolver { endpoints, authority: Some(authority.into()) }
    }
}

pub struct StaticIterator {
    endpoints: Vec<Endpoint>,
}

#[async_trait]
impl ResolverIterator for StaticIterator {
    async fn next(&mut self) -> Result<ResolverUpdate, Error> {
        Ok(ResolverUpdate::Updated(NameResolutionResult::new(self.endpoints.clone())))
    }
}

impl NameResolver for StaticResolver {
    type Iter = StaticIterator;

    fn mode(&self) -> UpdateMode {
        UpdateMode::Pull
    }

    fn new_iterator(&self) -> Self::Iter {
        StaticIterator { endpoints: self.endpoints.clone() }
    }

    fn authority(&self) -> Option<String> {
        self.authority
            .clone()
            .or_else(|| self.endpoints.first().map(|e| e.canonical_authority()))
    }
}
