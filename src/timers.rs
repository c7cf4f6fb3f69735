//! Timer primitives shared by the client and server connection managers.
//! Thin wrappers over `tokio::time`, bound to whatever single-threaded
//! scheduler drives the owning connection.
//!
//! Two shapes are needed: a one-shot timer that can be armed/cancelled
//! freely (idle, age, grace, client-keepalive-timeout, server-keepalive),
//! and a repeating ticker (client keepalive ping cadence). The client
//! keepalive timer is repeating; the server keepalive timer is one-shot
//! and rearmed on read completion — deliberately different shapes, so
//! they get two different types here instead of one "repeating: bool"
//! flag.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

/// A timer that fires once after being armed, and can be disarmed (or
/// re-armed with a new duration) at any point before it fires. Polling a
/// disarmed timer never resolves.
pub struct OneShotTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl OneShotTimer {
    pub fn disarmed() -> Self {
        Self { sleep: None }
    }

    /// Arm the timer to fire after `duration`. Replaces any previous arm.
    pub fn arm(&mut self, duration: Duration) {
        self.sleep = Some(Box::pin(sleep(duration)));
    }

    pub fn arm_at(&mut self, deadline: Instant) {
        self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline)));
    }

    /// Cancel the timer. Idempotent: cancelling an already-disarmed timer
    /// is a no-op, so teardown code never has to track whether it already
    /// cancelled a given timer.
    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves once, when the timer fires. After firing the timer becomes
    /// disarmed again (so it is not re-polled and re-fired next turn).
    pub async fn fired(&mut self) {
        std::future::poll_fn(|cx| self.poll_fired(cx)).await
    }

    pub fn poll_fired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match self.sleep.as_mut() {
            Some(s) => match s.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.sleep = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Pending,
        }
    }
}

/// A repeating ticker used for the client keepalive ping cadence: fires
/// every `period` for as long as it stays armed, and can be stopped/started
/// as the open-stream count transitions.
pub struct RepeatingTimer {
    period: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl RepeatingTimer {
    pub fn new(period: Duration) -> Self {
        Self { period, sleep: None }
    }

    pub fn start(&mut self) {
        self.sleep = Some(Box::pin(sleep(self.period)));
    }

    pub fn stop(&mut self) {
        self.sleep = None;
    }

    pub fn is_running(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves each time the period elapses, immediately rearming for the
    /// next period.
    pub async fn tick(&mut self) {
        std::future::poll_fn(|cx| self.poll_tick(cx)).await
    }

    pub fn poll_tick(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match self.sleep.as_mut() {
            Some(s) => match s.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.sleep = Some(Box::pin(sleep(self.period)));
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Pending,
        }
    }
}
