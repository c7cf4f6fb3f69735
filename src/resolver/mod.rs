//! The name-resolver subsystem feeding a client connection its
//! endpoints. Defines the `NameResolver` contract plus a generic
//! [`ResolverDriver`] that implements re-iterability, exponential backoff,
//! and cancellation once for every resolver implementation.

#[cfg(feature = "resolver-dns")]
pub mod dns;
pub mod static_list;
pub mod uds;

use crate::error::Error;
use crate::Endpoint;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

#[cfg(feature = "resolver-dns")]
pub use dns::DnsResolver;
pub use static_list::StaticResolver;
pub use uds::UdsResolver;

/// Whether a resolver's iterators are re-created per lookup (`Pull`, e.g.
/// DNS) or represent a long-lived subscription the resolver pushes updates
/// into (`Push`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Pull,
    Push,
}

/// What one resolution attempt produced.
#[derive(Debug, Clone)]
pub struct NameResolutionResult {
    pub endpoints: Vec<Endpoint>,
    /// Opaque service config blob, if the resolver produced one. Out of
    /// scope to parse; carried through verbatim.
    pub service_config: Option<String>,
}

impl NameResolutionResult {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        NameResolutionResult { endpoints, service_config: None }
    }
}

/// One update from a resolver's iterator.
#[derive(Debug)]
pub enum ResolverUpdate {
    Updated(NameResolutionResult),
    /// Only valid in `Push` mode: a `Pull` iterator must never
    /// return this.
    EndOfSequence,
}

/// One in-progress resolution sequence, produced by [`NameResolver::new_iterator`].
#[async_trait]
pub trait ResolverIterator: Send {
    async fn next(&mut self) -> Result<ResolverUpdate, Error>;
}

/// A name-resolver factory: long-lived (holds e.g. a hostname or a static
/// endpoint list), producing fresh [`ResolverIterator`]s on demand so the
/// driver can recover from a failed or ended sequence without losing its
/// configuration.
pub trait NameResolver: Send {
    type Iter: ResolverIterator;

    fn mode(&self) -> UpdateMode;
    fn new_iterator(&self) -> Self::Iter;

    /// The `:authority`/SNI hostname this resolver's target implies, if it
    /// has an opinion — e.g. the DNS name rather than whichever A/AAAA
    /// record happened to be dialed. `None` leaves the channel to fall back
    /// to the first resolved endpoint's own canonical authority.
    fn authority(&self) -> Option<String> {
        None
    }
}

/// Cooperative cancellation signal for [`ResolverDriver::next`], shareable
/// across tasks.
#[derive(Clone)]
pub struct ResolverCancellation {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ResolverCancellation {
    pub fn new() -> Self {
        ResolverCancellation { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

impl Default for ResolverCancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff used between re-iteration attempts, deliberately
/// simple (no jitter) since this crate only needs to avoid a hot retry
/// loop, not load-shed a fleet.
struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Backoff { base, max, attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Drives one [`NameResolver`] generically: re-acquires a fresh iterator
/// after an error or (push-mode) end-of-sequence, backs off exponentially
/// between attempts, and exits cleanly on cancellation without reopening.
pub struct ResolverDriver<R: NameResolver> {
    resolver: R,
    iter: R::Iter,
    backoff: Backoff,
}

impl<R: NameResolver> ResolverDriver<R> {
    pub fn new(resolver: R) -> Self {
        let iter = resolver.new_iterator();
        ResolverDriver {
            resolver,
            iter,
            backoff: Backoff::new(Duration::from_millis(250), Duration::from_secs(120)),
        }
    }

    /// Produce the next resolution result, or `None` if `cancel` fired.
    /// A successful `endpoints == []` result is handed straight to the
    /// caller: the channel, not this driver, decides whether to keep
    /// last-known-good endpoints.
    pub async fn next(&mut self, cancel: &ResolverCancellation) -> Option<NameResolutionResult> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                biased;
                _ = cancel.wait() => return None,
                outcome = self.iter.next() => {
                    match outcome {
                        Ok(ResolverUpdate::Updated(result)) => {
                            self.backoff.reset();
                            return Some(result);
                        }
                        Ok(ResolverUpdate::EndOfSequence) => {
                            if self.resolver.mode() == UpdateMode::Pull {
                                warn!("pull-mode resolver iterator returned end-of-sequence, which violates its contract");
                            } else {
                                debug!("resolver subscription closed cleanly, re-iterating after backoff");
                            }
                            self.back_off_and_reiterate(cancel).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "resolver iterator failed, re-iterating after backoff");
                            self.back_off_and_reiterate(cancel).await;
                        }
                    }
                }
            }
        }
    }

    async fn back_off_and_reiterate(&mut self, cancel: &ResolverCancellation) {
        let delay = self.backoff.next_delay();
        trace!(?delay, "backing off before acquiring a fresh resolver iterator");
        tokio::select! {
            biased;
            _ = cancel.wait() => {}
            _ = crate::transport::sleep(delay) => {}
        }
        self.iter = self.resolver.new_iterator();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SocketAddress;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    struct FlakyIter {
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ResolverIterator for FlakyIter {
        async fn next(&mut self) -> Result<ResolverUpdate, Error> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Err("transient failure".into())
            } else {
                Ok(ResolverUpdate::Updated(NameResolutionResult::new(vec![Endpoint::single(
                    SocketAddress::ipv4(Ipv4Addr::new(127, 0, 0, 1), 9000),
                )])))
            }
        }
    }

    struct FlakyResolver {
        calls: Arc<Mutex<u32>>,
    }

    impl NameResolver for FlakyResolver {
        type Iter = FlakyIter;

        fn mode(&self) -> UpdateMode {
            UpdateMode::Pull
        }

        fn new_iterator(&self) -> Self::Iter {
            FlakyIter { calls: self.calls.clone() }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_one_failed_iterator() {
        let calls = Arc::new(Mutex::new(0));
        let mut driver = ResolverDriver::new(FlakyResolver { calls });
        let cancel = ResolverCancellation::new();
        let result = driver.next(&cancel).await.expect("should eventually resolve");
        assert_eq!(result.endpoints.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_driver_without_reopening() {
        let calls = Arc::new(Mutex::new(0));
        let mut driver = ResolverDriver::new(FlakyResolver { calls });
        let cancel = ResolverCancellation::new();
        cancel.cancel();
        assert!(driver.next(&cancel).await.is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        assert_eq!(b.next_delay(), Duration::from_millis(800));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
