//! Environment signal bridge
//!
//! Hosts feed visibility and network changes into the manager: going to the
//! background or offline pauses every channel, coming back resumes or
//! reconnects them.

use crate::manager::RealtimeManager;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Online,
    Offline,
}

/// A change in the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "snake_case")]
pub enum EnvironmentSignal {
    Visibility(Visibility),
    Network(NetworkState),
}

impl RealtimeManager {
    /// React to one environment change
    pub fn handle_signal(&self, signal: EnvironmentSignal) {
        tracing::debug!(signal = ?signal, "Environment signal");
        match signal {
            EnvironmentSignal::Visibility(Visibility::Background) => self.pause(),
            EnvironmentSignal::Visibility(Visibility::Foreground) => self.resume(),
            EnvironmentSignal::Network(NetworkState::Offline) => {
                tracing::warn!("Network offline, pausing realtime connections");
                self.pause();
            }
            EnvironmentSignal::Network(NetworkState::Online) => {
                tracing::info!("Network online, reconnecting");
                self.reconnect_all();
            }
        }
    }
}

/// Forward every signal from `signals` to `manager` until the sender side closes
pub fn spawn_signal_bridge(
    manager: RealtimeManager,
    mut signals: mpsc::Receiver<EnvironmentSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            manager.handle_signal(signal);
        }
        tracing::debug!("Environment signal source closed");
    })
}
