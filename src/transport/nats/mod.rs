//! NATS transport
//!
//! Each channel maps to the core NATS subject `<prefix>.<channel>`. Events
//! travel as JSON-encoded [`RealtimeEvent`]s; broadcasts sent through a
//! channel are published on the same subject, tagged with the channel's
//! sender id so the channel does not hear its own messages.

mod config;

pub use config::NatsConfig;

use super::{EventHandler, StatusHandler, Transport, TransportChannel};
use crate::error::{RealtimeError, Result};
use crate::types::{BroadcastMessage, ChannelStatus, EventFilter, RealtimeEvent, SubscriptionId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

type Handlers = Arc<Mutex<Vec<(SubscriptionId, EventFilter, EventHandler)>>>;

/// Header carrying the id of the channel that published a message
const SENDER_HEADER: &str = "Realtime-Sender";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport backed by a NATS connection
#[derive(Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
    config: Arc<NatsConfig>,
}

impl NatsTransport {
    /// Connect to the NATS server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = build_connect_options(&config)
            .connect(&config.url)
            .await
            .map_err(|e| RealtimeError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Underlying client for advanced usage
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Publish an event to the subject of `event.channel`
    pub async fn publish(&self, event: &RealtimeEvent) -> Result<()> {
        publish_event(&self.client, self.config.subject(&event.channel), event, None).await
    }
}

impl Transport for NatsTransport {
    fn channel(&self, name: &str) -> Arc<dyn TransportChannel> {
        Arc::new(NatsChannel {
            name: name.to_string(),
            subject: self.config.subject(name),
            sender: uuid::Uuid::new_v4().to_string(),
            client: self.client.clone(),
            handlers: Arc::new(Mutex::new(Vec::new())),
            status: Mutex::new(None),
            reader: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Channel bound to one NATS subject
pub struct NatsChannel {
    name: String,
    subject: String,
    sender: String,
    client: async_nats::Client,
    handlers: Handlers,
    status: Mutex<Option<StatusHandler>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportChannel for NatsChannel {
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
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::Subscribe {
                channel: self.name.clone(),
                reason: "channel was unsubscribed".to_string(),
            });
        }

        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| RealtimeError::Subscribe {
                channel: self.name.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(channel = %self.name, subject = %self.subject, "NATS subscription created");

        *lock(&self.status) = Some(status.clone());
        let reader = tokio::spawn(read_events(
            self.name.clone(),
            subscriber,
            self.sender.clone(),
            self.handlers.clone(),
            status.clone(),
            self.closed.clone(),
        ));
        if let Some(previous) = lock(&self.reader).replace(reader) {
            previous.abort();
        }

        // Unsubscribed while the server round trip was in flight
        if self.closed.load(Ordering::SeqCst) {
            if let Some(reader) = lock(&self.reader).take() {
                reader.abort();
            }
            lock(&self.status).take();
            return Err(RealtimeError::Subscribe {
                channel: self.name.clone(),
                reason: "channel was unsubscribed".to_string(),
            });
        }

        status(ChannelStatus::Subscribed);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.handlers).clear();

        // Dropping the subscriber unsubscribes it on the server
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader.abort();
        }

        let status = lock(&self.status).take();
        if let Some(status) = status {
            status(ChannelStatus::Closed);
        }
        Ok(())
    }

    async fn send(&self, message: BroadcastMessage) -> Result<()> {
        let event = RealtimeEvent::broadcast(self.name.clone(), message.event, message.payload);
        publish_event(&self.client, self.subject.clone(), &event, Some(&self.sender))
            .await
            .map_err(|e| RealtimeError::Send {
                channel: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

async fn read_events(
    name: String,
    mut subscriber: async_nats::Subscriber,
    sender: String,
    handlers: Handlers,
    status: StatusHandler,
    closed: Arc<AtomicBool>,
) {
    while let Some(message) = subscriber.next().await {
        if sent_by(message.headers.as_ref(), &sender) {
            continue;
        }

        let event: RealtimeEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(channel = %name, error = %e, "Dropping undecodable NATS message");
                continue;
            }
        };

        let matching: Vec<EventHandler> = lock(&handlers)
            .iter()
            .filter(|(_, filter, _)| filter.matches(&event))
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in matching {
            handler(event.clone());
        }
    }

    if !closed.load(Ordering::SeqCst) {
        tracing::warn!(channel = %name, "NATS subscription stream ended");
        status(ChannelStatus::ChannelError(
            "subscription stream ended".to_string(),
        ));
    }
}

async fn publish_event(
    client: &async_nats::Client,
    subject: String,
    event: &RealtimeEvent,
    sender: Option<&str>,
) -> Result<()> {
    let payload = Bytes::from(serde_json::to_vec(event)?);

    let published = match sender {
        Some(sender) => {
            let mut headers = async_nats::HeaderMap::new();
            headers.insert(SENDER_HEADER, sender);
            client
                .publish_with_headers(subject.clone(), headers, payload)
                .await
        }
        None => client.publish(subject.clone(), payload).await,
    };
    published.map_err(|e| RealtimeError::Connection(format!("publish to '{}': {}", subject, e)))?;
    client
        .flush()
        .await
        .map_err(|e| RealtimeError::Connection(format!("flush after '{}': {}", subject, e)))?;

    tracing::trace!(subject = %subject, channel = %event.channel, "Event published");
    Ok(())
}

fn sent_by(headers: Option<&async_nats::HeaderMap>, sender: &str) -> bool {
    headers
        .and_then(|h| h.get(SENDER_HEADER))
        .is_some_and(|value| value.as_str() == sender)
}

fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }
    if let Some(ref name) = config.client_name {
        opts = opts.name(name);
    }

    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_by_matches_own_sender_only() {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(SENDER_HEADER, "channel-a");

        assert!(sent_by(Some(&headers), "channel-a"));
        assert!(!sent_by(Some(&headers), "channel-b"));
        assert!(!sent_by(Some(&async_nats::HeaderMap::new()), "channel-a"));
        assert!(!sent_by(None, "channel-a"));
    }
}
