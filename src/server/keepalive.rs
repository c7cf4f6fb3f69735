//! Server-side keep-alive/ping-strike policing (gRFC A8).

use std::time::{Duration, Instant};

const TWO_HOURS: Duration = Duration::from_secs(2 * 60 * 60);

/// `{ allowWithoutCalls, minInterval, maxStrikes=2, strikes, lastValidPing }`
/// for the server side of keep-alive ping policing.
pub struct KeepaliveState {
    allow_without_calls: bool,
    min_interval: Duration,
    max_strikes: u32,
    strikes: u32,
    last_valid_ping: Option<Instant>,
}

/// What receiving one PING should cause the connection manager to do.
#[derive(Debug, PartialEq, Eq)]
pub enum PingOutcome {
    Accepted,
    Strike { count: u32 },
    TooManyPings,
}

impl KeepaliveState {
    pub fn new(allow_without_calls: bool, min_interval: Duration) -> Self {
        KeepaliveState {
            allow_without_calls,
            min_interval,
            max_strikes: 2,
            strikes: 0,
            last_valid_ping: None,
        }
    }

    fn interval_for(&self, any_stream_open: bool) -> Duration {
        if any_stream_open || self.allow_without_calls {
            self.min_interval
        } else {
            TWO_HOURS
        }
    }

    /// Apply the ping-policing rule to a PING arriving at `now`.
    pub fn received_ping(&mut self, now: Instant, any_stream_open: bool) -> PingOutcome {
        let interval = self.interval_for(any_stream_open);

        let accept = match self.last_valid_ping {
            None => true,
            Some(last) => last + interval <= now,
        };

        if accept {
            self.last_valid_ping = Some(now);
            return PingOutcome::Accepted;
        }

        self.strikes += 1;
        if self.strikes > self.max_strikes {
            PingOutcome::TooManyPings
        } else {
            PingOutcome::Strike { count: self.strikes }
        }
    }

    /// Legitimate outbound activity (a HEADERS or DATA frame flush) proves
    /// the connection is live; clear the strike count.
    pub fn reset(&mut self) {
        self.strikes = 0;
        self.last_valid_ping = None;
    }

    pub fn strikes(&self) -> u32 {
        self.strikes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_ping_is_always_accepted() {
        let mut ka = KeepaliveState::new(true, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(ka.received_ping(now, true), PingOutcome::Accepted);
    }

    // S7 — too-many-pings: 4 pings back-to-back with minPingInterval=60s,
    // allow_without_calls=true. First is free, next two strike, the 4th
    // crosses the `strikes > 2` threshold.
    #[test]
    fn fourth_tight_ping_triggers_enhance_your_calm() {
        let mut ka = KeepaliveState::new(true, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(ka.received_ping(now, true), PingOutcome::Accepted);
        assert_eq!(ka.received_ping(now, true), PingOutcome::Strike { count: 1 });
        assert_eq!(ka.received_ping(now, true), PingOutcome::Strike { count: 2 });
        assert_eq!(ka.received_ping(now, true), PingOutcome::TooManyPings);
    }

    // S8 — a HEADERS/DATA write between bad pings resets strikes, so a
    // further run of 3 tight pings only trips enhance-your-calm on its own
    // 4th, not cumulatively with the earlier strikes.
    #[test]
    fn reset_clears_strikes_so_next_run_gets_its_own_budget() {
        let mut ka = KeepaliveState::new(true, Duration::from_secs(60));
        let now = Instant::now();
        ka.received_ping(now, true);
        ka.received_ping(now, true);
        ka.received_ping(now, true);
        assert_eq!(ka.strikes(), 2);

        ka.reset();
        assert_eq!(ka.strikes(), 0);

        assert_eq!(ka.received_ping(now, true), PingOutcome::Accepted);
        assert_eq!(ka.received_ping(now, true), PingOutcome::Strike { count: 1 });
        assert_eq!(ka.received_ping(now, true), PingOutcome::Strike { count: 2 });
        assert_eq!(ka.received_ping(now, true), PingOutcome::TooManyPings);
    }

    #[test]
    fn strikes_do_not_accumulate_past_interval() {
        let mut ka = KeepaliveState::new(true, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(ka.received_ping(now, true), PingOutcome::Accepted);
        let later = now + Duration::from_secs(61);
        assert_eq!(ka.received_ping(later, true), PingOutcome::Accepted);
    }

    #[test]
    fn without_calls_and_disallowed_uses_two_hour_interval() {
        let mut ka = KeepaliveState::new(false, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(ka.received_ping(now, false), PingOutcome::Accepted);
        let soon = now + Duration::from_secs(60);
        // 60s later is still well inside the 2h "no calls, not allowed"
        // interval, so this one strikes rather than being accepted.
        assert_eq!(ka.received_ping(soon, false), PingOutcome::Strike { count: 1 });
    }
}
