//! Per-connection idle tracking.

use std::time::Duration;
use tokio::time::Instant;

/// Timestamp of the last byte moved through a relay, in either direction.
///
/// Owned by a single relay task, so it needs no synchronisation.
#[derive(Debug, Clone)]
pub struct IdleTracker {
    last_activity: Instant,
    timeout: Duration,
}

impl IdleTracker {
    /// Start tracking with the clock set to now.
    pub fn new(timeout: Duration) -> Self {
        Self::starting_at(Instant::now(), timeout)
    }

    pub fn starting_at(now: Instant, timeout: Duration) -> Self {
        Self {
            last_activity: now,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn idle_for(&self) -> Duration {
        self.idle_for_at(Instant::now())
    }

    pub fn idle_for_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// True once the connection has been idle for at least the timeout.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.idle_for_at(now) >= self.timeout
    }

    /// Time left before the timeout is reached (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.timeout.saturating_sub(self.idle_for_at(now))
    }
}
