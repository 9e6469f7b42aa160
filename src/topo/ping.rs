//! Per-target heartbeat round bookkeeping.

use crate::core::{Instant, Millis};

/// Failed attempts tolerated within one heartbeat round before the target
/// is written off until the next interval.
pub const MAX_HEARTBEAT_RETRIES: u32 = 2;

/// Tracks heartbeat attempts toward a single target host.
///
/// A "round" starts when a request is prepared with no round in flight and
/// ends on success, on exhausting the retry budget, or when the heartbeat
/// timeout elapses. The record is keyed by host and survives reconfigs.
#[derive(Clone, Debug)]
pub struct PingStats {
    count: u64,
    rtt_estimate: Option<Millis>,
    failures_since_start: u32,
    exhausted: bool,
    last_start: Instant,
}

impl Default for PingStats {
    fn default() -> Self {
        Self {
            count: 0,
            rtt_estimate: None,
            // A fresh record has no round in flight.
            exhausted: true,
            failures_since_start: 0,
            last_start: Instant::ZERO,
        }
    }
}

impl PingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new round.
    pub fn start(&mut self, now: Instant) {
        self.last_start = now;
        self.failures_since_start = 0;
        self.exhausted = false;
    }

    /// Record a successful response. Resets the failure counter and closes
    /// the round; the next prepared request starts fresh.
    pub fn hit(&mut self, rtt: Millis) {
        self.count += 1;
        self.rtt_estimate = Some(match self.rtt_estimate {
            None => rtt,
            Some(current) => {
                Millis::from_millis((current.as_millis() * 4 + rtt.as_millis()) / 5)
            }
        });
        self.failures_since_start = 0;
        self.exhausted = true;
    }

    /// Record a failed response. The retry budget allows
    /// `MAX_HEARTBEAT_RETRIES` immediate retries; one more failure closes
    /// the round.
    pub fn miss(&mut self) {
        if self.failures_since_start >= MAX_HEARTBEAT_RETRIES {
            self.exhausted = true;
        } else {
            self.failures_since_start += 1;
        }
    }

    /// Successful heartbeats ever recorded against this target.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Smoothed round-trip estimate; `None` until the first success.
    pub fn rtt(&self) -> Option<Millis> {
        self.rtt_estimate
    }

    pub fn failures_since_start(&self) -> u32 {
        self.failures_since_start
    }

    /// Whether the current round is over and the next request must start a
    /// new one.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn last_start(&self) -> Instant {
        self.last_start
    }
}
