//! Stall detection.
//!
//! If nothing has been broadcast successfully for longer than the
//! recovery timeout, the transport has likely wedged (radio stack hang,
//! slots never completing). The watchdog only detects the stall; the node
//! owns the recovery sequence: stop and free all active slots, reset the
//! scheduler, reset the transport, resume scanning. The store keeps its
//! non-stale entries across a recovery.

use std::time::{Duration, Instant};

use log::warn;

/// Detects "no successful send in too long".
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    last_success: Instant,
    /// Recoveries triggered so far.
    recoveries: u32,
}

impl Watchdog {
    /// Create a watchdog armed at `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_success: now,
            recoveries: 0,
        }
    }

    /// Record a successful send.
    pub fn on_success(&mut self, now: Instant) {
        self.last_success = now;
    }

    /// Check for a stall. Returns `true` at most once per stall: the
    /// watchdog rearms itself so one long outage triggers one recovery,
    /// not one per tick.
    pub fn check(&mut self, now: Instant) -> bool {
        let silent = now.duration_since(self.last_success);
        if silent <= self.timeout {
            return false;
        }
        warn!(
            "no successful send for {:?} (limit {:?}), triggering recovery",
            silent, self.timeout
        );
        self.recoveries += 1;
        self.last_success = now;
        true
    }

    /// Time of the most recent successful send (or rearm).
    pub fn last_success(&self) -> Instant {
        self.last_success
    }

    /// Number of recoveries triggered since construction.
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }
}
