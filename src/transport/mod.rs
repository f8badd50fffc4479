//! Transport traits: the pub/sub backend underneath the channel pool
//!
//! A transport hands out named channels. Each channel accepts event
//! handlers, joins the backend with `subscribe`, reports status changes
//! through a status handler, and can send broadcast messages. The manager
//! never assumes anything about the wire protocol beyond this contract.

use crate::error::Result;
use crate::types::{BroadcastMessage, ChannelStatus, EventFilter, RealtimeEvent, SubscriptionId};
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub mod nats;

/// Handler invoked for every event matching a registered filter
pub type EventHandler = Arc<dyn Fn(RealtimeEvent) + Send + Sync>;

/// Handler invoked for every status change of a channel
pub type StatusHandler = Arc<dyn Fn(ChannelStatus) + Send + Sync>;

/// Factory for transport channels
pub trait Transport: Send + Sync {
    /// Create a new, not yet subscribed channel object for `name`
    ///
    /// Every call returns a fresh object; pooling is the caller's job.
    fn channel(&self, name: &str) -> Arc<dyn TransportChannel>;

    /// Transport name (e.g., "memory", "nats")
    fn name(&self) -> &str;
}

/// One named pub/sub stream on the backend
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Channel name this object was created for
    fn topic(&self) -> &str;

    /// Register the handler of subscription `id` for events matching `filter`
    ///
    /// Handlers registered before `subscribe` receive every event after the
    /// channel joins.
    fn on(&self, id: SubscriptionId, filter: EventFilter, handler: EventHandler);

    /// Drop the handler registered for `id`
    fn off(&self, id: &SubscriptionId);

    /// Join the channel on the backend
    ///
    /// Resolves once the join request has been issued. The outcome, and every
    /// later state change, arrives through `status`. An `Err` means the join
    /// could not even be attempted.
    async fn subscribe(&self, status: StatusHandler) -> Result<()>;

    /// Leave the channel and drop all registered handlers
    async fn unsubscribe(&self) -> Result<()>;

    /// Send a broadcast message, resolving when the backend acknowledged it
    async fn send(&self, message: BroadcastMessage) -> Result<()>;
}
