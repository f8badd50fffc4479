//! # a3s-realtime
//!
//! Resilient realtime subscription management for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-realtime` multiplexes any number of logical subscriptions over one
//! transport channel per name and keeps those channels alive: failed joins
//! are retried with exponential backoff, repeated failures trip a circuit
//! breaker, and the whole pool can be paused and resumed when the host goes
//! to the background or loses the network.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_realtime::{callback, EventFilter, RealtimeManager};
//! use a3s_realtime::transport::memory::MemoryTransport;
//!
//! # async fn example() -> a3s_realtime::Result<()> {
//! let manager = RealtimeManager::new(MemoryTransport::new())?;
//!
//! let id = manager.subscribe(
//!     "orders",
//!     EventFilter::table("public", "orders"),
//!     callback(|event| {
//!         println!("order changed: {}", event.payload);
//!         Ok(())
//!     }),
//! )?;
//!
//! println!("Subscribed: {}", id);
//! println!("Status: {:?}", manager.health().status);
//!
//! manager.cleanup();
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! - **memory**: In-process transport for testing, with scripted failures
//! - **nats**: Core NATS pub/sub, one subject per channel
//!
//! ## Architecture
//!
//! - **RealtimeManager**: channel pool plus reconnect and breaker orchestration
//! - **Transport** / **TransportChannel** traits: the backend seam
//! - **CircuitBreaker**, **HealthTracker**, **MetricsRecorder**: the state
//!   the manager drives, usable on their own
//! - **EnvironmentSignal**: visibility and network changes fed in by the host

pub mod breaker;
pub mod config;
pub mod error;
mod heartbeat;
pub mod health;
pub mod manager;
pub mod metrics;
mod pool;
pub mod reconnect;
pub mod signals;
mod timer;
pub mod transport;
pub mod types;

// Re-export core types
pub use breaker::{BreakerState, CircuitBreaker};
pub use config::{ConfigUpdate, RealtimeConfig};
pub use error::{CallbackError, RealtimeError, Result};
pub use health::HealthTracker;
pub use manager::{Lifecycle, RealtimeManager};
pub use metrics::{ChannelStats, MetricsRecorder, PerformanceSample};
pub use reconnect::{backoff_delay, next_retry, RetryDecision};
pub use signals::{spawn_signal_bridge, EnvironmentSignal, NetworkState, Visibility};
pub use transport::{EventHandler, StatusHandler, Transport, TransportChannel};
pub use types::{
    callback, BroadcastMessage, ChangeKind, ChannelStatus, ConnectionHealth, ConnectionStatus,
    EventFilter, EventKind, FilterOp, Priority, RealtimeEvent, RowFilter, SubscribeOptions,
    SubscriptionCallback, SubscriptionId, SubscriptionInfo,
};

// Re-export transports for convenience
pub use transport::memory::{MemoryChannel, MemoryTransport};
pub use transport::nats::{NatsChannel, NatsConfig, NatsTransport};
