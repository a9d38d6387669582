//! Connection state machine and circuit breaker.
//!
//! Adapter state and breaker fields live behind a single mutex that is
//! never held across a driver call.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// The six states a backend adapter can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

/// Result of the most recent health probe, kept for observability — the
/// health loop no longer discards its own findings.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub latency_ms: u64,
    pub checked_at: Instant,
}

struct Inner {
    state: ConnectionState,
    breaker_open: bool,
    last_failure_time: Option<Instant>,
    last_health: Option<HealthSnapshot>,
}

/// Mutex-guarded adapter state + circuit breaker, shared by the connection
/// supervisor and whichever adapter it wraps.
pub struct AdapterState {
    inner: Mutex<Inner>,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                breaker_open: false,
                last_failure_time: None,
                last_health: None,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// `Closed` is terminal; no transition out of it is permitted.
    pub fn set_state(&self, next: ConnectionState) {
        let mut g = self.inner.lock();
        if g.state == ConnectionState::Closed {
            return;
        }
        g.state = next;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn record_health(&self, healthy: bool, latency_ms: u64) {
        let mut g = self.inner.lock();
        g.last_health = Some(HealthSnapshot {
            healthy,
            latency_ms,
            checked_at: Instant::now(),
        });
    }

    pub fn last_health(&self) -> Option<HealthSnapshot> {
        self.inner.lock().last_health
    }

    /// True while the breaker is open and `retry_max_delay` has not yet
    /// elapsed since the last recorded failure.
    pub fn breaker_blocking(&self, retry_max_delay: Duration) -> bool {
        let g = self.inner.lock();
        if !g.breaker_open {
            return false;
        }
        match g.last_failure_time {
            Some(t) => t.elapsed() < retry_max_delay,
            None => false,
        }
    }

    pub fn open_breaker(&self) {
        let mut g = self.inner.lock();
        g.breaker_open = true;
        g.last_failure_time = Some(Instant::now());
    }

    /// Closes the breaker on the next successful connect.
    pub fn close_breaker(&self) {
        let mut g = self.inner.lock();
        g.breaker_open = false;
        g.last_failure_time = None;
    }

    pub fn breaker_open(&self) -> bool {
        self.inner.lock().breaker_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        let s = AdapterState::new();
        s.set_state(ConnectionState::Closed);
        s.set_state(ConnectionState::Connected);
        assert_eq!(s.state(), ConnectionState::Closed);
    }

    #[test]
    fn breaker_blocks_until_max_delay_elapses() {
        let s = AdapterState::new();
        s.open_breaker();
        assert!(s.breaker_blocking(Duration::from_secs(60)));
        assert!(!s.breaker_blocking(Duration::from_secs(0)));
    }

    #[test]
    fn breaker_closes_on_success() {
        let s = AdapterState::new();
        s.open_breaker();
        s.close_breaker();
        assert!(!s.breaker_open());
    }
}
