use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use wildmatch::WildMatch;

use crate::transport::{Message, Subscription};

/// Default per-pattern buffer; slower subscribers lose the oldest messages
pub const DEFAULT_ROUTER_CAPACITY: usize = 256;

/// In-process topic fan-out
///
/// Each subscribed pattern owns a broadcast channel. A publish is delivered
/// to every pattern that matches the topic, using MQTT-style wildcards.
pub struct TopicRouter {
    /// Topic pattern -> broadcast channel
    channels: DashMap<String, broadcast::Sender<Message>>,
    capacity: usize,

    total_messages_published: AtomicU64,
    total_subscribers: AtomicUsize,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ROUTER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            total_messages_published: AtomicU64::new(0),
            total_subscribers: AtomicUsize::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publish a message, returning how many receivers it reached
    pub fn publish(&self, message: Message) -> usize {
        let mut notified = 0;
        let mut abandoned = Vec::new();

        for entry in self.channels.iter() {
            if Self::topic_matches(&message.topic, entry.key()) {
                match entry.value().send(message.clone()) {
                    Ok(n) => notified += n,
                    // Every subscription on this pattern has been dropped
                    Err(_) => abandoned.push(entry.key().clone()),
                }
            }
        }

        // Shard locks are held while iterating, so prune afterwards
        for pattern in abandoned {
            if self
                .channels
                .remove_if(&pattern, |_, tx| tx.receiver_count() == 0)
                .is_some()
            {
                debug!(%pattern, "Dropped pattern with no subscribers");
            }
        }

        self.total_messages_published.fetch_add(1, Ordering::Relaxed);
        trace!(topic = %message.topic, notified, "Routed message");

        notified
    }

    /// Subscribe to a topic pattern
    pub fn subscribe(&self, topic_pattern: &str) -> Subscription {
        // Receiver is created under the entry lock so a concurrent prune
        // cannot drop the channel out from under it
        let receiver = self
            .channels
            .entry(topic_pattern.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        self.total_subscribers.fetch_add(1, Ordering::Relaxed);
        debug!(pattern = %topic_pattern, "New subscription");

        Subscription::new(topic_pattern, receiver)
    }

    /// Drop every channel; outstanding subscriptions end
    pub fn close(&self) {
        self.channels.clear();
    }

    /// Check if a topic matches a pattern (MQTT-style wildcards)
    ///
    ///   topic: "hearth/plugin/start/ble"
    ///   pattern: "hearth/plugin/start/+"  -> matches (+ is one level)
    ///   pattern: "hearth/#"               -> matches (# is any number of levels)
    pub fn topic_matches(topic: &str, pattern: &str) -> bool {
        let multi_level = pattern.contains('#');
        if !multi_level && !pattern.contains('+') {
            return topic == pattern;
        }

        // With equal level counts a glob star can never swallow a separator
        if !multi_level && topic.split('/').count() != pattern.split('/').count() {
            return false;
        }

        let glob_pattern = pattern.replace(['+', '#'], "*");
        WildMatch::new(&glob_pattern).matches(topic)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            total_messages: self.total_messages_published.load(Ordering::Relaxed),
            total_subscribers: self.total_subscribers.load(Ordering::Relaxed),
            topics_count: self.channels.len(),
        }
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub total_messages: u64,
    pub total_subscribers: usize,
    pub topics_count: usize,
}
