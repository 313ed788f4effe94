//! Per-channel subscription bookkeeping

use dashmap::DashMap;
use std::sync::Arc;

/// Callback for delivered messages, called with `(channel, message)`
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// State of one channel the caller asked to subscribe to
#[derive(Clone)]
pub struct ChannelSubscription {
    pub channel: String,
    pub is_subscribing: bool,
    pub is_subscribed: bool,
    pub resubscribe_on_reconnect: bool,
    pub handler: MessageHandler,
}

impl ChannelSubscription {
    /// Subscribing or subscribed
    pub fn is_active(&self) -> bool {
        self.is_subscribing || self.is_subscribed
    }
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("channel", &self.channel)
            .field("is_subscribing", &self.is_subscribing)
            .field("is_subscribed", &self.is_subscribed)
            .field("resubscribe_on_reconnect", &self.resubscribe_on_reconnect)
            .finish()
    }
}

/// Channel name to subscription map, shared by the receive path and callers.
///
/// A channel missing from the registry is unsubscribed.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: DashMap<String, ChannelSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `channel` in the subscribing state
    pub fn add(&self, channel: &str, resubscribe_on_reconnect: bool, handler: MessageHandler) {
        self.channels.insert(
            channel.to_string(),
            ChannelSubscription {
                channel: channel.to_string(),
                is_subscribing: true,
                is_subscribed: false,
                resubscribe_on_reconnect,
                handler,
            },
        );
    }

    pub fn get(&self, channel: &str) -> Option<ChannelSubscription> {
        self.channels.get(channel).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn remove(&self, channel: &str) -> Option<ChannelSubscription> {
        self.channels.remove(channel).map(|(_, sub)| sub)
    }

    pub fn clear(&self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn mark_subscribing(&self, channel: &str) -> bool {
        self.update(channel, |sub| {
            sub.is_subscribing = true;
            sub.is_subscribed = false;
        })
    }

    pub fn mark_subscribed(&self, channel: &str) -> bool {
        self.update(channel, |sub| {
            sub.is_subscribing = false;
            sub.is_subscribed = true;
        })
    }

    pub fn mark_unsubscribed(&self, channel: &str) -> bool {
        self.update(channel, |sub| {
            sub.is_subscribing = false;
            sub.is_subscribed = false;
        })
    }

    /// Clear only the subscribing flag (a rejected subscribe)
    pub fn clear_subscribing(&self, channel: &str) -> bool {
        self.update(channel, |sub| sub.is_subscribing = false)
    }

    pub fn set_resubscribe(&self, channel: &str, resubscribe: bool) -> bool {
        self.update(channel, |sub| sub.resubscribe_on_reconnect = resubscribe)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .map_or(false, |entry| entry.is_subscribed)
    }

    /// Subscribing or subscribed
    pub fn is_active(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .map_or(false, |entry| entry.is_active())
    }

    /// Handler for a channel, cloned out so it can run without holding the map
    pub fn handler(&self, channel: &str) -> Option<MessageHandler> {
        self.channels
            .get(channel)
            .map(|entry| entry.handler.clone())
    }

    /// Prepare the registry for a revalidated session.
    ///
    /// Channels flagged for resubscription that were subscribing or
    /// subscribed go back to subscribing and are returned; every other entry
    /// is dropped.
    pub fn retain_for_resubscribe(&self) -> Vec<String> {
        let mut resubscribe = Vec::new();
        self.channels.retain(|channel, sub| {
            if sub.resubscribe_on_reconnect && sub.is_active() {
                sub.is_subscribing = true;
                sub.is_subscribed = false;
                resubscribe.push(channel.clone());
                true
            } else {
                false
            }
        });
        resubscribe.sort();
        resubscribe
    }

    fn update<F>(&self, channel: &str, f: F) -> bool
    where
        F: FnOnce(&mut ChannelSubscription),
    {
        match self.channels.get_mut(channel) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> MessageHandler {
        Arc::new(|_, _| {})
    }

    #[test]
    fn test_lifecycle_flags() {
        let registry = SubscriptionRegistry::new();
        registry.add("chat", true, noop());

        let sub = registry.get("chat").unwrap();
        assert!(sub.is_subscribing);
        assert!(!sub.is_subscribed);
        assert!(registry.is_active("chat"));
        assert!(!registry.is_subscribed("chat"));

        assert!(registry.mark_subscribed("chat"));
        assert!(registry.is_subscribed("chat"));
        assert!(!registry.get("chat").unwrap().is_subscribing);

        assert!(registry.mark_unsubscribed("chat"));
        assert!(!registry.is_active("chat"));

        assert!(!registry.mark_subscribed("missing"));
    }

    #[test]
    fn test_retain_for_resubscribe() {
        let registry = SubscriptionRegistry::new();
        registry.add("keep", true, noop());
        registry.mark_subscribed("keep");
        registry.add("pending", true, noop());
        registry.add("once", false, noop());
        registry.mark_subscribed("once");
        registry.add("idle", true, noop());
        registry.mark_unsubscribed("idle");

        let resubscribe = registry.retain_for_resubscribe();

        assert_eq!(resubscribe, vec!["keep".to_string(), "pending".to_string()]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("once"));
        assert!(!registry.contains("idle"));
        assert!(registry.get("keep").unwrap().is_subscribing);
        assert!(!registry.is_subscribed("keep"));
    }

    #[test]
    fn test_clear_subscribing_keeps_entry() {
        let registry = SubscriptionRegistry::new();
        registry.add("chat", true, noop());
        assert!(registry.clear_subscribing("chat"));
        assert!(registry.contains("chat"));
        assert!(!registry.is_active("chat"));
    }
}
