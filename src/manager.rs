//! Realtime subscription manager
//!
//! `RealtimeManager` multiplexes logical subscriptions over one transport
//! channel per name and keeps those channels alive: transport errors feed
//! exponential-backoff retries, repeated errors trip a circuit breaker, and
//! the whole pool can be paused and resumed.
//!
//! All bookkeeping sits behind a single mutex. Transport calls and subscriber
//! callbacks always run with that mutex released.

use crate::breaker::CircuitBreaker;
use crate::config::{ConfigUpdate, RealtimeConfig};
use crate::error::{RealtimeError, Result};
use crate::health::HealthTracker;
use crate::heartbeat;
use crate::metrics::{ChannelStats, MetricsRecorder, PerformanceSample};
use crate::pool::{ChannelPool, SubscriptionRecord};
use crate::reconnect::{next_retry, RetryDecision};
use crate::timer::TimerHandle;
use crate::transport::{EventHandler, StatusHandler, Transport, TransportChannel};
use crate::types::{
    ChannelStatus, ConnectionHealth, EventFilter, RealtimeEvent, SubscribeOptions,
    SubscriptionCallback, SubscriptionId, SubscriptionInfo,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Manager lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Subscriptions reach the transport
    Active,
    /// Transport channels closed; subscriptions retained for resume
    Paused,
    /// Terminal; everything released
    CleanedUp,
}

/// Handle to the realtime subscription manager
///
/// Cloning is cheap and every clone drives the same pool. Create one per
/// transport connection at the application's composition root and pass it
/// to whatever needs to subscribe.
#[derive(Clone)]
pub struct RealtimeManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    state: Mutex<State>,
}

pub(crate) struct State {
    pub(crate) config: RealtimeConfig,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) pool: ChannelPool,
    pub(crate) health: HealthTracker,
    breaker: CircuitBreaker,
    metrics: MetricsRecorder,
    retry_timers: HashMap<String, TimerHandle>,
    cooldown: Option<TimerHandle>,
    heartbeat: Option<TimerHandle>,
    reporter: Option<TimerHandle>,
}

impl State {
    fn sync_subscription_count(&mut self) {
        let count = self.pool.subscription_count();
        self.health.set_subscription_count(count);
    }

    fn may_join(&self, name: &str, generation: u64) -> bool {
        self.lifecycle == Lifecycle::Active
            && !self.breaker.is_open()
            && self.pool.is_current(name, generation)
    }
}

/// Work decided under the lock and carried out after releasing it
#[derive(Default)]
struct Plan {
    /// Transport channels to unsubscribe
    close: Vec<Arc<dyn TransportChannel>>,
    joins: Vec<PendingJoin>,
}

struct PendingJoin {
    name: String,
    channel: Arc<dyn TransportChannel>,
    generation: u64,
    handlers: Vec<(EventFilter, SubscriptionId)>,
    /// Issue a subscribe after registering handlers
    join: bool,
}

impl RealtimeManager {
    /// Create a manager with the default configuration
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: impl Transport + 'static) -> Result<Self> {
        Self::with_config(transport, RealtimeConfig::default())
    }

    /// Create a manager with an explicit configuration
    pub fn with_config(transport: impl Transport + 'static, config: RealtimeConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            RealtimeError::Config(format!("RealtimeManager requires a tokio runtime: {}", e))
        })?;

        let metrics = MetricsRecorder::new(config.metrics_window);
        let inner = Arc::new(Inner {
            transport: Arc::new(transport),
            runtime,
            state: Mutex::new(State {
                config,
                lifecycle: Lifecycle::Active,
                pool: ChannelPool::default(),
                health: HealthTracker::new(),
                breaker: CircuitBreaker::new(),
                metrics,
                retry_timers: HashMap::new(),
                cooldown: None,
                heartbeat: None,
                reporter: None,
            }),
        });

        {
            let mut state = inner.lock();
            let heartbeat_every = state.config.heartbeat_interval();
            let report_every = state.config.metrics_report_interval();
            state.heartbeat = Some(inner.start_heartbeat(heartbeat_every));
            state.reporter = Some(inner.start_reporter(report_every));
        }

        tracing::info!(transport = inner.transport.name(), "Realtime manager initialized");
        Ok(Self { inner })
    }

    /// Subscribe to events on `channel`
    ///
    /// Returns immediately; connection progress is visible through
    /// [`health`](Self::health). While the circuit breaker is open or the
    /// manager is paused, the subscription is recorded and only reaches the
    /// transport on the next reconnect.
    pub fn subscribe(
        &self,
        channel: &str,
        options: impl Into<SubscribeOptions>,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionId> {
        self.inner.subscribe(channel, options.into(), callback)
    }

    /// Close `channel` and drop every subscription on it
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe(&self, channel: &str) -> usize {
        self.inner.unsubscribe_channel(channel)
    }

    /// Drop one subscription, closing its channel if it was the last one
    pub fn unsubscribe_id(&self, id: &SubscriptionId) -> bool {
        self.inner.unsubscribe_id(id)
    }

    /// Close every transport channel but keep subscriptions for [`resume`](Self::resume)
    pub fn pause(&self) {
        self.inner.pause();
    }

    /// Recreate every retained subscription
    pub fn resume(&self) {
        tracing::info!("Resuming realtime connections");
        self.inner.reconnect_all();
    }

    /// Tear down and recreate every channel that has subscriptions
    pub fn reconnect_all(&self) {
        self.inner.reconnect_all();
    }

    /// Release every channel, subscription and timer
    ///
    /// Idempotent. The manager rejects new subscriptions afterwards.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    /// Apply a partial configuration update
    pub fn configure(&self, update: ConfigUpdate) -> Result<()> {
        self.inner.configure(update)
    }

    pub fn config(&self) -> RealtimeConfig {
        self.inner.lock().config.clone()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.inner.lock().health.snapshot()
    }

    pub fn metrics(&self) -> HashMap<String, ChannelStats> {
        self.inner.lock().metrics.report()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    pub fn is_circuit_open(&self) -> bool {
        self.inner.lock().breaker.is_open()
    }

    /// Every registered subscription
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.lock().pool.infos()
    }

    /// Channels with at least one subscription
    pub fn channel_names(&self) -> Vec<String> {
        self.inner.lock().pool.names()
    }

    /// Log the current health and per-channel stats
    pub fn report_metrics(&self) {
        self.inner.report_metrics();
    }

    /// Send one heartbeat probe now and return the measured round trip
    ///
    /// `None` when not connected, no channel has joined, or the probe failed.
    pub async fn probe_latency(&self) -> Option<Duration> {
        heartbeat::probe(&Arc::downgrade(&self.inner)).await.latency()
    }
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(
        self: &Arc<Self>,
        name: &str,
        options: SubscribeOptions,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionId> {
        if name.trim().is_empty() {
            return Err(RealtimeError::InvalidChannel(
                "channel name must not be empty".to_string(),
            ));
        }
        options.filter.validate()?;

        let id = SubscriptionId::generate();
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::CleanedUp {
            return Err(RealtimeError::ShutDown);
        }

        state.pool.add(
            name,
            SubscriptionRecord {
                id: id.clone(),
                filter: options.filter.clone(),
                priority: options.priority,
                callback,
            },
        );
        state.sync_subscription_count();

        if state.breaker.is_open() {
            tracing::warn!(channel = name, subscription = %id, "Circuit breaker is open, queuing subscription");
            return Ok(id);
        }
        if state.lifecycle == Lifecycle::Paused {
            tracing::debug!(channel = name, subscription = %id, "Manager paused, queuing subscription");
            return Ok(id);
        }

        let pending = match state.pool.transport(name) {
            Some((channel, generation)) => PendingJoin {
                name: name.to_string(),
                channel,
                generation,
                handlers: vec![(options.filter.clone(), id.clone())],
                join: state.pool.take_stalled(name),
            },
            None => {
                tracing::info!(channel = name, "Creating new channel");
                self.attach_locked(&mut state, name)
            }
        };
        drop(state);

        tracing::info!(
            channel = name,
            subscription = %id,
            priority = ?options.priority,
            "Subscription registered"
        );

        self.execute(Plan {
            close: Vec::new(),
            joins: vec![pending],
        });
        Ok(id)
    }

    /// Bind a fresh transport channel carrying every record under `name`
    fn attach_locked(&self, state: &mut State, name: &str) -> PendingJoin {
        let channel = self.transport.channel(name);
        let generation = state.pool.attach(name, channel.clone());
        let handlers = state
            .pool
            .records(name)
            .iter()
            .map(|r| (r.filter.clone(), r.id.clone()))
            .collect();
        PendingJoin {
            name: name.to_string(),
            channel,
            generation,
            handlers,
            join: true,
        }
    }

    fn execute(self: &Arc<Self>, plan: Plan) {
        self.close_channels(plan.close);
        for pending in plan.joins {
            for (filter, id) in pending.handlers {
                let handler = self.event_handler(&pending.name, id.clone());
                pending.channel.on(id, filter, handler);
            }
            if pending.join {
                self.spawn_join(pending.name, pending.channel, pending.generation);
            }
        }
    }

    fn close_channels(&self, channels: Vec<Arc<dyn TransportChannel>>) {
        if channels.is_empty() {
            return;
        }
        self.runtime.spawn(async move {
            for channel in channels {
                if let Err(e) = channel.unsubscribe().await {
                    tracing::warn!(
                        channel = channel.topic(),
                        error = %e,
                        "Failed to unsubscribe transport channel"
                    );
                }
            }
        });
    }

    /// Time-bounded subscribe on a bound transport channel
    fn spawn_join(
        self: &Arc<Self>,
        name: String,
        channel: Arc<dyn TransportChannel>,
        generation: u64,
    ) {
        let weak = Arc::downgrade(self);
        let status = self.status_handler(&name, generation);

        self.runtime.spawn(async move {
            let timeout = {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let mut state = inner.lock();
                if !state.may_join(&name, generation) {
                    tracing::debug!(channel = %name, "Skipping subscribe for inactive channel");
                    return;
                }
                state.health.mark_connecting();
                state.config.connect_timeout()
            };

            let outcome = tokio::time::timeout(timeout, channel.subscribe(status)).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            match outcome {
                Ok(Ok(())) => {
                    let current = inner.lock().pool.is_current(&name, generation);
                    if current {
                        tracing::debug!(channel = %name, "Subscribe issued");
                    } else {
                        // Replaced or dropped while the subscribe was in flight
                        tracing::debug!(channel = %name, "Closing stale join");
                        inner.close_channels(vec![channel]);
                    }
                }
                Ok(Err(e)) => {
                    inner.on_transport_error(&name, generation, &e.to_string());
                }
                Err(_) => {
                    tracing::warn!(
                        channel = %name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Subscribe timed out"
                    );
                    inner.on_transport_error(&name, generation, "connection timeout");
                }
            }
        });
    }

    fn status_handler(self: &Arc<Self>, name: &str, generation: u64) -> StatusHandler {
        let weak = Arc::downgrade(self);
        let name = name.to_string();
        Arc::new(move |status| {
            if let Some(inner) = weak.upgrade() {
                inner.on_status(&name, generation, status);
            }
        })
    }

    fn event_handler(self: &Arc<Self>, name: &str, id: SubscriptionId) -> EventHandler {
        let weak = Arc::downgrade(self);
        let name = name.to_string();
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(&name, &id, event);
            }
        })
    }

    /// Run one subscriber callback behind the error boundary
    fn dispatch(&self, name: &str, id: &SubscriptionId, event: RealtimeEvent) {
        let Some(callback) = self.lock().pool.callback(name, id) else {
            return;
        };

        let started = Instant::now();
        let sample = match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
            Ok(Ok(())) => PerformanceSample::Latency(started.elapsed()),
            Ok(Err(e)) => {
                tracing::error!(
                    channel = name,
                    subscription = %id,
                    error = %e,
                    "Subscription callback error"
                );
                PerformanceSample::CallbackError
            }
            Err(panic) => {
                tracing::error!(
                    channel = name,
                    subscription = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Subscription callback panicked"
                );
                PerformanceSample::CallbackError
            }
        };

        let mut state = self.lock();
        if state.lifecycle != Lifecycle::CleanedUp {
            state.metrics.record(name, sample);
        }
    }

    fn on_status(self: &Arc<Self>, name: &str, generation: u64, status: ChannelStatus) {
        let mut state = self.lock();
        if !state.pool.is_current(name, generation) {
            tracing::debug!(channel = name, status = ?status, "Ignoring status from replaced channel");
            return;
        }
        tracing::debug!(channel = name, status = ?status, "Channel status");

        match status {
            ChannelStatus::Subscribed => {
                state.pool.set_joined(name, true);
                state.retry_timers.remove(name);
                state.health.mark_connected();
                tracing::info!(channel = name, "Channel subscribed");
            }
            ChannelStatus::Closed => {
                state.pool.set_joined(name, false);
                state.health.mark_disconnected();
            }
            ChannelStatus::ChannelError(reason) => {
                state.pool.set_joined(name, false);
                self.handle_error(&mut state, name, &reason);
            }
            ChannelStatus::TimedOut => {
                state.pool.set_joined(name, false);
                self.handle_error(&mut state, name, "channel timed out");
            }
        }
    }

    fn on_transport_error(self: &Arc<Self>, name: &str, generation: u64, reason: &str) {
        let mut state = self.lock();
        if !state.pool.is_current(name, generation) {
            return;
        }
        self.handle_error(&mut state, name, reason);
    }

    /// Count a transport error, then trip the breaker or schedule a retry
    fn handle_error(self: &Arc<Self>, state: &mut State, name: &str, reason: &str) {
        let errors = state.health.record_error();
        tracing::warn!(
            channel = name,
            error = reason,
            error_count = errors,
            "Connection error"
        );

        if state.breaker.should_trip(errors, &state.config) {
            self.open_circuit(state);
        } else {
            self.schedule_retry(state, name);
        }
    }

    fn schedule_retry(self: &Arc<Self>, state: &mut State, name: &str) {
        match next_retry(state.health.reconnect_attempts(), &state.config) {
            RetryDecision::Exhausted if state.config.circuit_breaker_enabled => {
                tracing::error!(channel = name, "Max reconnection attempts reached");
                self.open_circuit(state);
            }
            RetryDecision::Exhausted => {
                tracing::error!(
                    channel = name,
                    "Max reconnection attempts reached, giving up on channel"
                );
                state.retry_timers.remove(name);
                state.pool.set_stalled(name);
            }
            RetryDecision::Retry { delay, attempt } => {
                state.health.increment_reconnect();
                tracing::info!(
                    channel = name,
                    delay_ms = delay.as_millis() as u64,
                    attempt,
                    "Scheduling reconnect"
                );

                let weak = Arc::downgrade(self);
                let owned = name.to_string();
                let timer = TimerHandle::once(&self.runtime, delay, move || async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire_retry(&owned);
                    }
                });
                // Replacing the handle aborts any pending timer for this channel
                state.retry_timers.insert(name.to_string(), timer);
            }
        }
    }

    fn fire_retry(self: &Arc<Self>, name: &str) {
        let mut state = self.lock();
        state.retry_timers.remove(name);
        if state.lifecycle != Lifecycle::Active || state.breaker.is_open() {
            return;
        }
        let Some((channel, generation)) = state.pool.transport(name) else {
            return;
        };
        drop(state);

        tracing::info!(channel = name, "Retrying subscribe");
        self.spawn_join(name.to_string(), channel, generation);
    }

    fn open_circuit(self: &Arc<Self>, state: &mut State) {
        if !state.breaker.trip() {
            return;
        }
        tracing::warn!(
            trips = state.breaker.trips(),
            "Circuit breaker opened, stopping reconnection attempts"
        );

        state.health.mark_circuit_open();
        state.retry_timers.clear();
        let detached = state.pool.detach_all();
        self.close_channels(detached);

        let weak = Arc::downgrade(self);
        state.cooldown = Some(TimerHandle::once(
            &self.runtime,
            state.config.circuit_breaker_reset(),
            move || async move {
                if let Some(inner) = weak.upgrade() {
                    inner.close_circuit();
                }
            },
        ));
    }

    fn close_circuit(self: &Arc<Self>) {
        let mut state = self.lock();
        state.cooldown = None;
        if state.lifecycle == Lifecycle::CleanedUp || !state.breaker.is_open() {
            return;
        }

        tracing::info!("Resetting circuit breaker");
        state.breaker.reset();
        state.health.mark_circuit_closed();

        if state.lifecycle == Lifecycle::Paused {
            return;
        }
        let plan = self.plan_reconnect_all(&mut state);
        drop(state);
        self.execute(plan);
    }

    fn plan_reconnect_all(&self, state: &mut State) -> Plan {
        let mut plan = Plan::default();
        for name in state.pool.names() {
            if let Some(stale) = state.pool.detach(&name) {
                plan.close.push(stale);
            }
            plan.joins.push(self.attach_locked(state, &name));
        }
        tracing::info!(channels = plan.joins.len(), "Reconnecting all channels");
        plan
    }

    fn reconnect_all(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::CleanedUp {
            return;
        }
        state.lifecycle = Lifecycle::Active;
        if state.breaker.is_open() {
            tracing::info!("Circuit breaker open, reconnect deferred until cooldown");
            return;
        }

        state.retry_timers.clear();
        let plan = self.plan_reconnect_all(&mut state);
        drop(state);
        self.execute(plan);
    }

    fn pause(&self) {
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::CleanedUp {
            return;
        }
        state.lifecycle = Lifecycle::Paused;
        state.retry_timers.clear();
        let detached = state.pool.detach_all();
        state.health.mark_disconnected();
        drop(state);

        tracing::info!(channels = detached.len(), "Pausing realtime connections");
        self.close_channels(detached);
    }

    fn unsubscribe_channel(&self, name: &str) -> usize {
        let mut state = self.lock();
        let Some((transport, removed)) = state.pool.remove_channel(name) else {
            return 0;
        };
        state.retry_timers.remove(name);
        state.sync_subscription_count();
        drop(state);

        if let Some(channel) = transport {
            self.close_channels(vec![channel]);
        }
        tracing::info!(channel = name, removed, "Unsubscribed from channel");
        removed
    }

    fn unsubscribe_id(&self, id: &SubscriptionId) -> bool {
        let mut state = self.lock();
        let Some(removed) = state.pool.remove_subscription(id) else {
            return false;
        };
        if removed.emptied {
            state.retry_timers.remove(&removed.channel);
        }
        state.sync_subscription_count();
        drop(state);

        match removed.transport {
            Some(channel) if removed.emptied => self.close_channels(vec![channel]),
            Some(channel) => channel.off(id),
            None => {}
        }
        tracing::info!(channel = %removed.channel, subscription = %id, "Subscription removed");
        true
    }

    fn cleanup(&self) {
        let mut state = self.lock();
        let was_active = state.lifecycle != Lifecycle::CleanedUp;
        state.lifecycle = Lifecycle::CleanedUp;
        state.retry_timers.clear();
        state.cooldown = None;
        state.heartbeat = None;
        state.reporter = None;
        let channels = state.pool.clear();
        state.metrics.clear();
        state.breaker.reset();
        state.health.reset();
        drop(state);

        if was_active {
            tracing::info!(channels = channels.len(), "Cleaning up all realtime connections");
        }
        self.close_channels(channels);
    }

    fn configure(self: &Arc<Self>, update: ConfigUpdate) -> Result<()> {
        let mut state = self.lock();
        let next = state.config.merged(&update)?;

        let heartbeat_changed = next.heartbeat_interval_ms != state.config.heartbeat_interval_ms;
        let report_changed =
            next.metrics_report_interval_ms != state.config.metrics_report_interval_ms;
        if next.metrics_window != state.config.metrics_window {
            state.metrics.set_window(next.metrics_window);
        }
        state.config = next;

        if state.lifecycle != Lifecycle::CleanedUp {
            if heartbeat_changed {
                state.heartbeat = Some(self.start_heartbeat(state.config.heartbeat_interval()));
            }
            if report_changed {
                state.reporter = Some(self.start_reporter(state.config.metrics_report_interval()));
            }
        }

        tracing::info!(config = ?state.config, "Connection configuration updated");
        Ok(())
    }

    fn start_heartbeat(self: &Arc<Self>, period: Duration) -> TimerHandle {
        let weak = Arc::downgrade(self);
        TimerHandle::every(&self.runtime, period, move || {
            let weak = weak.clone();
            async move { heartbeat::tick(&weak).await }
        })
    }

    fn start_reporter(self: &Arc<Self>, period: Duration) -> TimerHandle {
        let weak: Weak<Inner> = Arc::downgrade(self);
        TimerHandle::every(&self.runtime, period, move || {
            let alive = match weak.upgrade() {
                Some(inner) => {
                    inner.report_metrics();
                    true
                }
                None => false,
            };
            async move { alive }
        })
    }

    fn report_metrics(&self) {
        let (health, channels) = {
            let state = self.lock();
            (state.health.snapshot(), state.metrics.report())
        };

        tracing::info!(
            status = ?health.status,
            error_count = health.error_count,
            reconnect_attempts = health.reconnect_attempts,
            latency_ms = health.latency_ms,
            subscriptions = health.subscription_count,
            "Performance report"
        );
        for (channel, stats) in channels {
            tracing::info!(
                channel = %channel,
                avg_ms = stats.avg_ms,
                min_ms = stats.min_ms,
                max_ms = stats.max_ms,
                errors = stats.errors,
                "Channel performance"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
