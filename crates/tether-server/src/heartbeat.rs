//! Ping/pong liveness tracking for one connection.
//!
//! The inbound pump marks the connection alive on every frame it reads,
//! pongs included. The outbound pump checks the flag once per keepalive
//! tick and gives up after enough consecutive silent ticks.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "peer said something since the last check" flag.
#[derive(Debug)]
pub(crate) struct Liveness {
    is_alive: AtomicBool,
}

impl Liveness {
    /// A fresh connection counts as alive.
    pub(crate) fn new() -> Self {
        Self {
            is_alive: AtomicBool::new(true),
        }
    }

    pub(crate) fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the flag.
    ///
    /// Returns `true` if the peer was heard from since the last check.
    pub(crate) fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}

/// Result of one keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    Alive,
    Missed(u32),
    TimedOut,
}

/// Consecutive silent ticks, with the limit that ends the connection.
#[derive(Debug)]
pub(crate) struct MissedPongs {
    missed: u32,
    max_missed: u32,
}

impl MissedPongs {
    /// `max_missed` is clamped to at least 1.
    pub(crate) fn new(max_missed: u32) -> Self {
        Self {
            missed: 0,
            max_missed: max_missed.max(1),
        }
    }

    pub(crate) fn observe(&mut self, responded: bool) -> Beat {
        if responded {
            self.missed = 0;
            return Beat::Alive;
        }
        self.missed += 1;
        if self.missed >= self.max_missed {
            Beat::TimedOut
        } else {
            Beat::Missed(self.missed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_is_alive_once() {
        let liveness = Liveness::new();
        assert!(liveness.check_alive());
        assert!(!liveness.check_alive());
        liveness.mark_alive();
        assert!(liveness.check_alive());
    }

    #[test]
    fn times_out_after_consecutive_misses() {
        let mut pongs = MissedPongs::new(3);
        assert_eq!(pongs.observe(false), Beat::Missed(1));
        assert_eq!(pongs.observe(false), Beat::Missed(2));
        assert_eq!(pongs.observe(false), Beat::TimedOut);
    }

    #[test]
    fn response_resets_the_count() {
        let mut pongs = MissedPongs::new(2);
        assert_eq!(pongs.observe(false), Beat::Missed(1));
        assert_eq!(pongs.observe(true), Beat::Alive);
        assert_eq!(pongs.observe(false), Beat::Missed(1));
        assert_eq!(pongs.observe(false), Beat::TimedOut);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let mut pongs = MissedPongs::new(0);
        assert_eq!(pongs.observe(false), Beat::TimedOut);
    }
}
