//! Manager configuration
//!
//! All durations are expressed in milliseconds on the wire. Updates are
//! validated as a whole before they replace the active configuration.

use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`RealtimeManager`](crate::RealtimeManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// Retries before escalating to the circuit breaker
    pub max_retries: u32,

    /// First reconnect delay; doubled on every attempt
    pub base_retry_delay_ms: u64,

    /// Upper bound for the reconnect delay
    pub max_retry_delay_ms: u64,

    /// Heartbeat probe interval while connected
    pub heartbeat_interval_ms: u64,

    /// Bound on a single transport subscribe
    pub connect_timeout_ms: u64,

    pub circuit_breaker_enabled: bool,

    /// Errors that trip the breaker
    pub circuit_breaker_threshold: u32,

    /// Cooldown before a tripped breaker closes again
    pub circuit_breaker_reset_ms: u64,

    /// Interval of the periodic metrics report
    pub metrics_report_interval_ms: u64,

    /// Samples retained per channel
    pub metrics_window: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_ms: 60_000,
            metrics_report_interval_ms: 60_000,
            metrics_window: 100,
        }
    }
}

impl RealtimeConfig {
    /// Reject values that would turn into broken timers
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("baseRetryDelayMs", self.base_retry_delay_ms),
            ("maxRetryDelayMs", self.max_retry_delay_ms),
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("circuitBreakerResetMs", self.circuit_breaker_reset_ms),
            ("metricsReportIntervalMs", self.metrics_report_interval_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RealtimeError::Config(format!("{} must be positive", name)));
            }
        }

        if self.max_retry_delay_ms < self.base_retry_delay_ms {
            return Err(RealtimeError::Config(format!(
                "maxRetryDelayMs ({}) must not be below baseRetryDelayMs ({})",
                self.max_retry_delay_ms, self.base_retry_delay_ms
            )));
        }

        if self.circuit_breaker_threshold == 0 {
            return Err(RealtimeError::Config(
                "circuitBreakerThreshold must be at least 1".to_string(),
            ));
        }

        if self.metrics_window == 0 {
            return Err(RealtimeError::Config(
                "metricsWindow must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply a partial update, returning the validated result
    ///
    /// `self` is left untouched when validation fails.
    pub fn merged(&self, update: &ConfigUpdate) -> Result<Self> {
        let mut next = self.clone();
        if let Some(v) = update.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = update.base_retry_delay_ms {
            next.base_retry_delay_ms = v;
        }
        if let Some(v) = update.max_retry_delay_ms {
            next.max_retry_delay_ms = v;
        }
        if let Some(v) = update.heartbeat_interval_ms {
            next.heartbeat_interval_ms = v;
        }
        if let Some(v) = update.connect_timeout_ms {
            next.connect_timeout_ms = v;
        }
        if let Some(v) = update.circuit_breaker_enabled {
            next.circuit_breaker_enabled = v;
        }
        if let Some(v) = update.circuit_breaker_threshold {
            next.circuit_breaker_threshold = v;
        }
        if let Some(v) = update.circuit_breaker_reset_ms {
            next.circuit_breaker_reset_ms = v;
        }
        if let Some(v) = update.metrics_report_interval_ms {
            next.metrics_report_interval_ms = v;
        }
        if let Some(v) = update.metrics_window {
            next.metrics_window = v;
        }
        next.validate()?;
        Ok(next)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn circuit_breaker_reset(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_reset_ms)
    }

    pub fn metrics_report_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_report_interval_ms)
    }
}

/// Partial configuration for [`RealtimeManager::configure`](crate::RealtimeManager::configure)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_reset_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_report_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_window: Option<usize>,
}
