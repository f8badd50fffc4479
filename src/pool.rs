//! Channel pool bookkeeping
//!
//! One entry per channel name, holding at most one transport channel and
//! every subscription registered under that name. Subscription records
//! outlive their transport channel: pausing or tripping the breaker detaches
//! the transport but keeps the records so they can be replayed.

use crate::transport::TransportChannel;
use crate::types::{
    EventFilter, Priority, SubscriptionCallback, SubscriptionId, SubscriptionInfo,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered subscription
#[derive(Clone)]
pub(crate) struct SubscriptionRecord {
    pub(crate) id: SubscriptionId,
    pub(crate) filter: EventFilter,
    pub(crate) priority: Priority,
    pub(crate) callback: SubscriptionCallback,
}

/// Outcome of removing one subscription
pub(crate) struct RemovedSubscription {
    pub(crate) channel: String,
    /// Transport channel bound to the name at removal time
    pub(crate) transport: Option<Arc<dyn TransportChannel>>,
    /// The record was the last one; the whole entry is gone
    pub(crate) emptied: bool,
}

/// Transport channel currently bound to a name
struct Attachment {
    channel: Arc<dyn TransportChannel>,
    generation: u64,
    joined: bool,
    /// Retries ran out without the breaker taking over
    stalled: bool,
}

#[derive(Default)]
struct ChannelEntry {
    attachment: Option<Attachment>,
    subscriptions: Vec<SubscriptionRecord>,
}

#[derive(Default)]
pub(crate) struct ChannelPool {
    entries: HashMap<String, ChannelEntry>,
    next_generation: u64,
}

impl ChannelPool {
    pub(crate) fn add(&mut self, name: &str, record: SubscriptionRecord) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .subscriptions
            .push(record);
    }

    /// Drop a whole channel, returning its transport and how many records went with it
    pub(crate) fn remove_channel(
        &mut self,
        name: &str,
    ) -> Option<(Option<Arc<dyn TransportChannel>>, usize)> {
        self.entries.remove(name).map(|entry| {
            (
                entry.attachment.map(|a| a.channel),
                entry.subscriptions.len(),
            )
        })
    }

    /// Drop one subscription
    pub(crate) fn remove_subscription(
        &mut self,
        id: &SubscriptionId,
    ) -> Option<RemovedSubscription> {
        let name = self
            .entries
            .iter()
            .find(|(_, entry)| entry.subscriptions.iter().any(|r| &r.id == id))
            .map(|(name, _)| name.clone())?;

        let entry = self.entries.get_mut(&name)?;
        entry.subscriptions.retain(|r| &r.id != id);

        if entry.subscriptions.is_empty() {
            let transport = self
                .entries
                .remove(&name)
                .and_then(|e| e.attachment)
                .map(|a| a.channel);
            return Some(RemovedSubscription {
                channel: name,
                transport,
                emptied: true,
            });
        }

        let transport = entry.attachment.as_ref().map(|a| a.channel.clone());
        Some(RemovedSubscription {
            channel: name,
            transport,
            emptied: false,
        })
    }

    /// Bind a fresh transport channel to `name`, returning its generation
    pub(crate) fn attach(&mut self, name: &str, channel: Arc<dyn TransportChannel>) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.entry(name.to_string()).or_default().attachment = Some(Attachment {
            channel,
            generation,
            joined: false,
            stalled: false,
        });
        generation
    }

    /// Unbind the transport channel from `name`, keeping its subscriptions
    pub(crate) fn detach(&mut self, name: &str) -> Option<Arc<dyn TransportChannel>> {
        self.entries
            .get_mut(name)
            .and_then(|entry| entry.attachment.take())
            .map(|a| a.channel)
    }

    pub(crate) fn detach_all(&mut self) -> Vec<Arc<dyn TransportChannel>> {
        self.entries
            .values_mut()
            .filter_map(|entry| entry.attachment.take())
            .map(|a| a.channel)
            .collect()
    }

    /// Drop everything, returning the transport channels to close
    pub(crate) fn clear(&mut self) -> Vec<Arc<dyn TransportChannel>> {
        let channels = self.detach_all();
        self.entries.clear();
        channels
    }

    /// Bound transport channel and its generation
    pub(crate) fn transport(&self, name: &str) -> Option<(Arc<dyn TransportChannel>, u64)> {
        self.entries
            .get(name)
            .and_then(|entry| entry.attachment.as_ref())
            .map(|a| (a.channel.clone(), a.generation))
    }

    /// Whether `generation` is still the channel bound to `name`
    pub(crate) fn is_current(&self, name: &str, generation: u64) -> bool {
        self.entries
            .get(name)
            .and_then(|entry| entry.attachment.as_ref())
            .is_some_and(|a| a.generation == generation)
    }

    fn attachment_mut(&mut self, name: &str) -> Option<&mut Attachment> {
        self.entries
            .get_mut(name)
            .and_then(|entry| entry.attachment.as_mut())
    }

    pub(crate) fn set_joined(&mut self, name: &str, joined: bool) {
        if let Some(a) = self.attachment_mut(name) {
            a.joined = joined;
            if joined {
                a.stalled = false;
            }
        }
    }

    pub(crate) fn set_stalled(&mut self, name: &str) {
        if let Some(a) = self.attachment_mut(name) {
            a.stalled = true;
        }
    }

    /// Clear the stalled flag, returning whether it was set
    pub(crate) fn take_stalled(&mut self, name: &str) -> bool {
        self.attachment_mut(name)
            .is_some_and(|a| std::mem::take(&mut a.stalled))
    }

    /// Any joined transport channel
    pub(crate) fn joined_channel(&self) -> Option<Arc<dyn TransportChannel>> {
        self.entries
            .values()
            .filter_map(|entry| entry.attachment.as_ref())
            .find(|a| a.joined)
            .map(|a| a.channel.clone())
    }

    pub(crate) fn callback(
        &self,
        name: &str,
        id: &SubscriptionId,
    ) -> Option<SubscriptionCallback> {
        self.entries
            .get(name)?
            .subscriptions
            .iter()
            .find(|r| &r.id == id)
            .map(|r| r.callback.clone())
    }

    pub(crate) fn records(&self, name: &str) -> &[SubscriptionRecord] {
        self.entries
            .get(name)
            .map(|entry| entry.subscriptions.as_slice())
            .unwrap_or(&[])
    }

    /// Names that have at least one subscription
    pub(crate) fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.subscriptions.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.entries.values().map(|e| e.subscriptions.len()).sum()
    }

    #[cfg(test)]
    pub(crate) fn attached_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.attachment.is_some())
            .count()
    }

    pub(crate) fn infos(&self) -> Vec<SubscriptionInfo> {
        self.entries
            .iter()
            .flat_map(|(name, entry)| {
                entry.subscriptions.iter().map(move |r| SubscriptionInfo {
                    id: r.id.clone(),
                    channel: name.clone(),
                    filter: r.filter.clone(),
                    priority: r.priority,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::Transport;
    use crate::types::callback;

    fn record() -> SubscriptionRecord {
        SubscriptionRecord {
            id: SubscriptionId::generate(),
            filter: EventFilter::table("public", "orders"),
            priority: Priority::Normal,
            callback: callback(|_| Ok(())),
        }
    }

    #[test]
    fn test_add_and_count() {
        let mut pool = ChannelPool::default();
        pool.add("orders", record());
        pool.add("orders", record());
        pool.add("products", record());
        assert_eq!(pool.subscription_count(), 3);
        assert_eq!(pool.records("orders").len(), 2);

        let mut names = pool.names();
        names.sort();
        assert_eq!(names, vec!["orders", "products"]);
    }

    #[test]
    fn test_attach_bumps_generation() {
        let transport = MemoryTransport::new();
        let mut pool = ChannelPool::default();
        pool.add("orders", record());

        let first = pool.attach("orders", transport.channel("orders"));
        assert!(pool.is_current("orders", first));

        let second = pool.attach("orders", transport.channel("orders"));
        assert!(second > first);
        assert!(!pool.is_current("orders", first));
        assert!(pool.is_current("orders", second));
    }

    #[test]
    fn test_detach_keeps_records() {
        let transport = MemoryTransport::new();
        let mut pool = ChannelPool::default();
        pool.add("orders", record());
        let generation = pool.attach("orders", transport.channel("orders"));

        assert_eq!(pool.detach_all().len(), 1);
        assert!(!pool.is_current("orders", generation));
        assert!(pool.transport("orders").is_none());
        assert_eq!(pool.subscription_count(), 1);
        assert_eq!(pool.attached_count(), 0);
    }

    #[test]
    fn test_remove_subscription_reports_bound_channel() {
        let transport = MemoryTransport::new();
        let mut pool = ChannelPool::default();
        let a = record();
        let b = record();
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        pool.add("orders", a);
        pool.add("orders", b);
        pool.attach("orders", transport.channel("orders"));

        let removed = pool.remove_subscription(&a_id).unwrap();
        assert_eq!(removed.channel, "orders");
        assert!(!removed.emptied);
        assert!(removed.transport.is_some());
        assert_eq!(pool.subscription_count(), 1);

        let removed = pool.remove_subscription(&b_id).unwrap();
        assert!(removed.emptied);
        assert!(removed.transport.is_some());
        assert_eq!(pool.subscription_count(), 0);
        assert!(pool.names().is_empty());

        assert!(pool.remove_subscription(&b_id).is_none());
    }

    #[test]
    fn test_joined_channel_lookup() {
        let transport = MemoryTransport::new();
        let mut pool = ChannelPool::default();
        pool.add("orders", record());
        pool.attach("orders", transport.channel("orders"));
        assert!(pool.joined_channel().is_none());

        pool.set_joined("orders", true);
        assert_eq!(pool.joined_channel().unwrap().topic(), "orders");
    }

    #[test]
    fn test_stalled_flag() {
        let transport = MemoryTransport::new();
        let mut pool = ChannelPool::default();
        pool.add("orders", record());
        assert!(!pool.take_stalled("orders"));

        pool.attach("orders", transport.channel("orders"));
        pool.set_stalled("orders");
        assert!(pool.take_stalled("orders"));
        assert!(!pool.take_stalled("orders"));

        pool.set_stalled("orders");
        pool.set_joined("orders", true);
        assert!(!pool.take_stalled("orders"));
    }

    #[test]
    fn test_callback_lookup() {
        let mut pool = ChannelPool::default();
        let r = record();
        let id = r.id.clone();
        pool.add("orders", r);
        assert!(pool.callback("orders", &id).is_some());
        assert!(pool.callback("products", &id).is_none());

        let (_, count) = pool.remove_channel("orders").unwrap();
        assert_eq!(count, 1);
        assert!(pool.callback("orders", &id).is_none());
    }
}
