//! Circuit breaker
//!
//! Tracks whether new transport subscribes are allowed. The cooldown timer
//! itself is owned by the manager; this type only holds the state machine.

use crate::config::RealtimeConfig;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Tripped; no transport subscribes until the cooldown expires
    Open { since: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    trips: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            trips: 0,
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }

    /// Times the breaker has tripped since construction
    pub fn trips(&self) -> u64 {
        self.trips
    }

    /// Whether `error_count` errors should trip the breaker
    pub fn should_trip(&self, error_count: u32, config: &RealtimeConfig) -> bool {
        config.circuit_breaker_enabled
            && !self.is_open()
            && error_count >= config.circuit_breaker_threshold
    }

    /// Open the breaker; returns false if it was already open
    pub fn trip(&mut self) -> bool {
        if self.is_open() {
            return false;
        }
        self.state = BreakerState::Open {
            since: Instant::now(),
        };
        self.trips += 1;
        true
    }

    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold() {
        let breaker = CircuitBreaker::new();
        let config = RealtimeConfig::default();
        assert!(!breaker.should_trip(4, &config));
        assert!(breaker.should_trip(5, &config));
        assert!(breaker.should_trip(6, &config));
    }

    #[test]
    fn test_disabled_never_trips() {
        let breaker = CircuitBreaker::new();
        let config = RealtimeConfig {
            circuit_breaker_enabled: false,
            ..Default::default()
        };
        assert!(!breaker.should_trip(100, &config));
    }

    #[tokio::test]
    async fn test_trip_and_reset() {
        let mut breaker = CircuitBreaker::new();
        assert!(breaker.trip());
        assert!(breaker.is_open());
        assert!(!breaker.trip());
        assert_eq!(breaker.trips(), 1);
        assert!(!breaker.should_trip(10, &RealtimeConfig::default()));

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.trip());
        assert_eq!(breaker.trips(), 2);
    }
}
