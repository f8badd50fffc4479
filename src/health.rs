//! Connection health tracking
//!
//! Pure data plus the transition rules applied when the transport reports
//! a status change. No I/O and no timers live here.

use crate::types::{ConnectionHealth, ConnectionStatus};
use chrono::Utc;
use std::time::Duration;

/// Owner of the [`ConnectionHealth`] record
#[derive(Debug, Default)]
pub struct HealthTracker {
    health: ConnectionHealth,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.health.status
    }

    pub fn error_count(&self) -> u32 {
        self.health.error_count
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.health.reconnect_attempts
    }

    /// Transport confirmed a subscription
    ///
    /// `error_count` is left alone; only a breaker reset clears it.
    pub fn mark_connected(&mut self) {
        self.health.status = ConnectionStatus::Connected;
        self.health.last_connected_at = Some(Utc::now());
        self.health.reconnect_attempts = 0;
    }

    /// A subscribe is in flight; never downgrades an established connection
    pub fn mark_connecting(&mut self) {
        if matches!(
            self.health.status,
            ConnectionStatus::Disconnected | ConnectionStatus::Error
        ) {
            self.health.status = ConnectionStatus::Connecting;
        }
    }

    pub fn mark_disconnected(&mut self) {
        if self.health.status != ConnectionStatus::CircuitOpen {
            self.health.status = ConnectionStatus::Disconnected;
        }
    }

    /// Record a transport-level failure and return the new error count
    pub fn record_error(&mut self) -> u32 {
        self.health.status = ConnectionStatus::Error;
        self.health.error_count = self.health.error_count.saturating_add(1);
        self.health.last_error_at = Some(Utc::now());
        self.health.error_count
    }

    /// Bump the attempt counter before arming a retry
    pub fn increment_reconnect(&mut self) {
        self.health.reconnect_attempts = self.health.reconnect_attempts.saturating_add(1);
    }

    pub fn mark_circuit_open(&mut self) {
        self.health.status = ConnectionStatus::CircuitOpen;
    }

    /// Breaker cooldown finished
    pub fn mark_circuit_closed(&mut self) {
        self.health.status = ConnectionStatus::Disconnected;
        self.health.error_count = 0;
    }

    pub fn record_latency(&mut self, latency: Duration) {
        self.health.latency_ms = latency.as_secs_f64() * 1_000.0;
    }

    pub fn set_subscription_count(&mut self, count: usize) {
        self.health.subscription_count = count;
    }

    pub fn reset(&mut self) {
        self.health = ConnectionHealth::default();
    }

    pub fn snapshot(&self) -> ConnectionHealth {
        self.health.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_resets_attempts_but_not_errors() {
        let mut tracker = HealthTracker::new();
        tracker.record_error();
        tracker.increment_reconnect();
        tracker.increment_reconnect();

        tracker.mark_connected();
        let health = tracker.snapshot();
        assert_eq!(health.status, ConnectionStatus::Connected);
        assert_eq!(health.reconnect_attempts, 0);
        assert_eq!(health.error_count, 1);
        assert!(health.last_connected_at.is_some());
    }

    #[test]
    fn test_record_error_stamps_time() {
        let mut tracker = HealthTracker::new();
        assert_eq!(tracker.record_error(), 1);
        assert_eq!(tracker.record_error(), 2);
        let health = tracker.snapshot();
        assert_eq!(health.status, ConnectionStatus::Error);
        assert!(health.last_error_at.is_some());
    }

    #[test]
    fn test_connecting_does_not_downgrade() {
        let mut tracker = HealthTracker::new();
        tracker.mark_connecting();
        assert_eq!(tracker.status(), ConnectionStatus::Connecting);

        tracker.mark_connected();
        tracker.mark_connecting();
        assert_eq!(tracker.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_circuit_open_is_sticky_until_closed() {
        let mut tracker = HealthTracker::new();
        tracker.record_error();
        tracker.mark_circuit_open();
        tracker.mark_disconnected();
        assert_eq!(tracker.status(), ConnectionStatus::CircuitOpen);

        tracker.mark_circuit_closed();
        assert_eq!(tracker.status(), ConnectionStatus::Disconnected);
        assert_eq!(tracker.error_count(), 0);
    }

    #[test]
    fn test_reset_returns_zero_value() {
        let mut tracker = HealthTracker::new();
        tracker.record_error();
        tracker.mark_connected();
        tracker.record_latency(Duration::from_millis(12));
        tracker.set_subscription_count(4);

        tracker.reset();
        assert_eq!(tracker.snapshot(), ConnectionHealth::default());
    }
}
