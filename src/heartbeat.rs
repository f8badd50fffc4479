//! Heartbeat latency probe
//!
//! On every heartbeat tick a small broadcast goes out on one joined channel
//! and the acknowledgement round trip is stored as the connection latency.
//! A failed probe is only logged; it never counts as a connection error.

use crate::health::HealthTracker;
use crate::manager::Inner;
use crate::types::{BroadcastMessage, ConnectionStatus};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Probe {
    /// Not connected or no joined channel to probe through
    Skipped,
    Failed,
    Measured(Duration),
}

impl Probe {
    pub(crate) fn latency(self) -> Option<Duration> {
        match self {
            Probe::Measured(latency) => Some(latency),
            _ => None,
        }
    }
}

/// Periodic tick; returns false once the manager is gone
pub(crate) async fn tick(manager: &Weak<Inner>) -> bool {
    if manager.strong_count() == 0 {
        return false;
    }
    probe(manager).await;
    true
}

pub(crate) async fn probe(manager: &Weak<Inner>) -> Probe {
    let (channel, timeout) = {
        let Some(inner) = manager.upgrade() else {
            return Probe::Skipped;
        };
        let state = inner.lock();
        if state.health.status() != ConnectionStatus::Connected {
            return Probe::Skipped;
        }
        let Some(channel) = state.pool.joined_channel() else {
            return Probe::Skipped;
        };
        (channel, state.config.connect_timeout())
    };

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, channel.send(BroadcastMessage::heartbeat())).await;
    let elapsed = started.elapsed();

    match result {
        Ok(Ok(())) => {
            if let Some(inner) = manager.upgrade() {
                record(&mut inner.lock().health, elapsed);
            }
            tracing::trace!(
                channel = channel.topic(),
                latency_ms = elapsed.as_secs_f64() * 1_000.0,
                "Heartbeat acknowledged"
            );
            Probe::Measured(elapsed)
        }
        Ok(Err(e)) => {
            tracing::debug!(channel = channel.topic(), error = %e, "Heartbeat failed");
            Probe::Failed
        }
        Err(_) => {
            tracing::debug!(channel = channel.topic(), "Heartbeat timed out");
            Probe::Failed
        }
    }
}

fn record(health: &mut HealthTracker, latency: Duration) {
    if health.status() == ConnectionStatus::Connected {
        health.record_latency(latency);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RealtimeConfig;
    use crate::manager::RealtimeManager;
    use crate::transport::memory::MemoryTransport;
    use crate::types::{callback, EventFilter};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_skipped_when_not_connected() {
        let transport = MemoryTransport::manual();
        let manager = RealtimeManager::new(transport.clone()).unwrap();
        manager
            .subscribe("orders", EventFilter::table("public", "orders"), callback(|_| Ok(())))
            .unwrap();
        settle().await;

        assert!(manager.probe_latency().await.is_none());
        assert!(transport.sent_messages("orders").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_sends_heartbeat_on_joined_channel() {
        let transport = MemoryTransport::new();
        let manager = RealtimeManager::new(transport.clone()).unwrap();
        manager
            .subscribe("orders", EventFilter::table("public", "orders"), callback(|_| Ok(())))
            .unwrap();
        settle().await;

        assert!(manager.probe_latency().await.is_some());
        let sent = transport.sent_messages("orders");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_is_not_a_connection_error() {
        let transport = MemoryTransport::new();
        let manager = RealtimeManager::new(transport.clone()).unwrap();
        manager
            .subscribe("orders", EventFilter::table("public", "orders"), callback(|_| Ok(())))
            .unwrap();
        settle().await;

        transport.set_fail_sends(true);
        assert!(manager.probe_latency().await.is_none());
        let health = manager.health();
        assert_eq!(health.error_count, 0);
        assert_eq!(health.status, crate::types::ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_heartbeat() {
        let transport = MemoryTransport::new();
        let config = RealtimeConfig {
            heartbeat_interval_ms: 1_000,
            ..RealtimeConfig::default()
        };
        let manager = RealtimeManager::with_config(transport.clone(), config).unwrap();
        manager
            .subscribe("orders", EventFilter::table("public", "orders"), callback(|_| Ok(())))
            .unwrap();
        settle().await;
        assert!(transport.sent_messages("orders").is_empty());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(transport.sent_messages("orders").len(), 3);
    }
}
