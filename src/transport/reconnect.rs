//! Reconnection state machine shared by every `Transport` backend:
//! `Connected -> Disconnected -> Reconnecting -> Connected | Error`, with
//! exponential backoff plus jitter between attempts.

use std::time::Duration;

use rand::RngExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base: Duration::from_millis(200),
            factor: 2.0,
            cap: Duration::from_secs(10),
            max_attempts: 8,
        }
    }
}

/// Tracks reconnect attempts and hands back the next delay to wait. Reset
/// to the base delay on every successful connect, so a transport that
/// drops and recovers repeatedly never "remembers" past failures.
pub struct Reconnector {
    config: BackoffConfig,
    state: ConnectionState,
    attempt: u32,
}

impl Reconnector {
    pub fn new(config: BackoffConfig) -> Self {
        Reconnector { config, state: ConnectionState::Connected, attempt: 0 }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempt = 0;
    }

    pub fn on_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Call before each reconnect attempt. Returns `None` once
    /// `max_attempts` is exhausted, at which point the caller should treat
    /// the transport as permanently lost (`ConnectionState::Error`).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            self.state = ConnectionState::Error;
            return None;
        }
        self.state = ConnectionState::Reconnecting;
        let exp = self.config.factor.powi(self.attempt as i32);
        let scaled = (self.config.base.as_secs_f64() * exp).min(self.config.cap.as_secs_f64());
        let jittered = rand::rng().random_range(0.0..scaled.max(0.001));
        self.attempt += 1;
        Some(Duration::from_secs_f64(jittered))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_is_bounded_by_cap_and_resets_on_success() {
        let mut r = Reconnector::new(BackoffConfig {
            base: Duration::from_millis(100),
            factor: 2.0,
            cap: Duration::from_millis(500),
            max_attempts: 10,
        });
        for _ in 0..6 {
            let d = r.next_delay().unwrap();
            assert!(d <= Duration::from_millis(500));
        }
        r.on_connected();
        assert_eq!(r.attempt(), 0);
        assert_eq!(r.state(), ConnectionState::Connected);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut r = Reconnector::new(BackoffConfig {
            base: Duration::from_millis(10),
            factor: 2.0,
            cap: Duration::from_millis(100),
            max_attempts: 3,
        });
        assert!(r.next_delay().is_some());
        assert!(r.next_delay().is_some());
        assert!(r.next_delay().is_some());
        assert!(r.next_delay().is_none());
        assert_eq!(r.state(), ConnectionState::Error);
    }
}
