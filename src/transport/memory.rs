//! In-memory transport for testing and single-process use
//!
//! Channels live in a process-local registry. Status changes are either
//! acknowledged automatically on subscribe or driven by hand through
//! [`MemoryTransport::emit_status`], and failures can be scripted to
//! exercise reconnect and circuit-breaker paths.

use super::{EventHandler, StatusHandler, Transport, TransportChannel};
use crate::error::{RealtimeError, Result};
use crate::types::{BroadcastMessage, ChannelStatus, EventFilter, RealtimeEvent, SubscriptionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Handlers = Mutex<Vec<(SubscriptionId, EventFilter, EventHandler)>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted failure modes shared by every channel of a transport
#[derive(Debug, Default)]
struct Faults {
    failing_subscribes: AtomicUsize,
    hang_subscribes: AtomicBool,
    subscribe_delay_ms: AtomicU64,
    fail_sends: AtomicBool,
}

impl Faults {
    fn take_subscribe_failure(&self) -> bool {
        self.failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-process transport
///
/// Cloning yields another handle to the same registry, so a test can keep
/// one clone for inspection while the manager owns another.
#[derive(Clone)]
pub struct MemoryTransport {
    auto_ack: bool,
    faults: Arc<Faults>,
    channels: Arc<Mutex<HashMap<String, Vec<Arc<MemoryChannel>>>>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Transport that reports `Subscribed` as soon as a channel subscribes
    pub fn new() -> Self {
        Self {
            auto_ack: true,
            faults: Arc::new(Faults::default()),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Transport that reports nothing until told to via `emit_status`
    pub fn manual() -> Self {
        Self {
            auto_ack: false,
            ..Self::new()
        }
    }

    /// Make the next `n` subscribe calls fail
    pub fn fail_next_subscribes(&self, n: usize) {
        self.faults.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Make subscribe calls never resolve
    pub fn set_hang_subscribes(&self, hang: bool) {
        self.faults.hang_subscribes.store(hang, Ordering::SeqCst);
    }

    /// Hold every subscribe call for `delay` before it resolves
    pub fn set_subscribe_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.faults.subscribe_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Make broadcast sends fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.faults.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Channel objects ever created for `name`
    pub fn channels_created(&self, name: &str) -> usize {
        lock(&self.channels).get(name).map_or(0, Vec::len)
    }

    /// Channel objects for `name` that have not been unsubscribed
    pub fn open_channels(&self, name: &str) -> usize {
        lock(&self.channels)
            .get(name)
            .map_or(0, |all| all.iter().filter(|c| !c.is_closed()).count())
    }

    /// Subscribe calls made on any channel object for `name`
    pub fn subscribe_attempts(&self, name: &str) -> usize {
        lock(&self.channels).get(name).map_or(0, |all| {
            all.iter()
                .map(|c| c.subscribe_calls.load(Ordering::SeqCst))
                .sum()
        })
    }

    /// Subscribe calls across every channel
    pub fn total_subscribe_attempts(&self) -> usize {
        lock(&self.channels)
            .values()
            .flatten()
            .map(|c| c.subscribe_calls.load(Ordering::SeqCst))
            .sum()
    }

    /// Handlers registered on the current channel for `name`
    pub fn handler_count(&self, name: &str) -> usize {
        self.current(name).map_or(0, |c| lock(&c.handlers).len())
    }

    /// Whether the current channel for `name` has joined
    pub fn is_joined(&self, name: &str) -> bool {
        self.current(name).is_some_and(|c| c.joined.load(Ordering::SeqCst))
    }

    /// Broadcasts sent on any channel object for `name`
    pub fn sent_messages(&self, name: &str) -> Vec<BroadcastMessage> {
        lock(&self.channels).get(name).map_or_else(Vec::new, |all| {
            all.iter()
                .flat_map(|c| lock(&c.sent).clone())
                .collect()
        })
    }

    /// Report a status change on the current channel for `name`
    ///
    /// Returns false if no subscribed channel is listening.
    pub fn emit_status(&self, name: &str, status: ChannelStatus) -> bool {
        let Some(channel) = self.current(name) else {
            return false;
        };
        channel.report(status)
    }

    /// Deliver an event to the joined channel named by `event.channel`
    ///
    /// Returns the number of handlers that matched.
    pub fn deliver(&self, event: RealtimeEvent) -> usize {
        let Some(channel) = self.current(&event.channel) else {
            return 0;
        };
        if !channel.joined.load(Ordering::SeqCst) {
            return 0;
        }

        let matching: Vec<EventHandler> = lock(&channel.handlers)
            .iter()
            .filter(|(_, filter, _)| filter.matches(&event))
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in &matching {
            handler(event.clone());
        }
        matching.len()
    }

    fn current(&self, name: &str) -> Option<Arc<MemoryChannel>> {
        lock(&self.channels)
            .get(name)
            .and_then(|all| all.iter().rev().find(|c| !c.is_closed()).cloned())
    }
}

impl Transport for MemoryTransport {
    fn channel(&self, name: &str) -> Arc<dyn TransportChannel> {
        let channel = Arc::new(MemoryChannel {
            name: name.to_string(),
            auto_ack: self.auto_ack,
            faults: self.faults.clone(),
            handlers: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            joined: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        });

        lock(&self.channels)
            .entry(name.to_string())
            .or_default()
            .push(channel.clone());

        channel
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Channel object handed out by [`MemoryTransport`]
pub struct MemoryChannel {
    name: String,
    auto_ack: bool,
    faults: Arc<Faults>,
    handlers: Handlers,
    status: Mutex<Option<StatusHandler>>,
    joined: AtomicBool,
    closed: AtomicBool,
    subscribe_calls: AtomicUsize,
    sent: Mutex<Vec<BroadcastMessage>>,
}

impl MemoryChannel {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn report(&self, status: ChannelStatus) -> bool {
        let Some(handler) = lock(&self.status).clone() else {
            return false;
        };
        self.joined
            .store(status == ChannelStatus::Subscribed, Ordering::SeqCst);
        handler(status);
        true
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    fn topic(&self) -> &str {
        &self.name
    }

    fn on(&self, id: SubscriptionId, filter: EventFilter, handler: EventHandler) {
        lock(&self.handlers).push((id, filter, handler));
    }

    fn off(&self, id: &SubscriptionId) {
        lock(&self.handlers).retain(|(registered, _, _)| registered != id);
    }

    async fn subscribe(&self, status: StatusHandler) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if self.faults.hang_subscribes.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let delay = self.faults.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.faults.take_subscribe_failure() {
            return Err(RealtimeError::Subscribe {
                channel: self.name.clone(),
                reason: "scripted failure".to_string(),
            });
        }

        if self.is_closed() {
            return Err(RealtimeError::Subscribe {
                channel: self.name.clone(),
                reason: "channel was unsubscribed".to_string(),
            });
        }

        *lock(&self.status) = Some(status);
        if self.auto_ack {
            self.report(ChannelStatus::Subscribed);
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.joined.store(false, Ordering::SeqCst);
        lock(&self.handlers).clear();

        let handler = lock(&self.status).take();
        if let Some(handler) = handler {
            handler(ChannelStatus::Closed);
        }
        Ok(())
    }

    async fn send(&self, message: BroadcastMessage) -> Result<()> {
        if !self.joined.load(Ordering::SeqCst) {
            return Err(RealtimeError::Send {
                channel: self.name.clone(),
                reason: "channel not joined".to_string(),
            });
        }
        if self.faults.fail_sends.load(Ordering::SeqCst) {
            return Err(RealtimeError::Send {
                channel: self.name.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}
