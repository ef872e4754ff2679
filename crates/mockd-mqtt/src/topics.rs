//! Topic subscriptions and retained messages
//!
//! MQTT filter matching: `+` matches exactly one level, `#` matches the
//! remaining tail (and must be last). Retained messages keep at most one
//! payload per topic; publishing an empty retained payload clears it.

use std::collections::HashMap;

/// One client subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub filter: String,
    pub qos: u8,
    pub client_id: String,
}

/// Retained payload for one topic.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub payload: Vec<u8>,
    pub qos: u8,
}

/// Subscription table plus retained store.
#[derive(Debug, Default)]
pub struct TopicTree {
    subscriptions: HashMap<String, Vec<Subscription>>,
    retained: HashMap<String, RetainedMessage>,
}

impl TopicTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Does a concrete topic match a subscription filter?
    pub fn matches_filter(topic: &str, filter: &str) -> bool {
        let mut topic_levels = topic.split('/');
        let mut filter_levels = filter.split('/').peekable();

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => {}
                (Some(expected), Some(actual)) if expected == actual => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// All subscriptions matching a published topic.
    pub fn match_topic(&self, topic: &str) -> Vec<Subscription> {
        self.subscriptions
            .values()
            .flatten()
            .filter(|s| Self::matches_filter(topic, &s.filter))
            .cloned()
            .collect()
    }

    pub fn subscribe(&mut self, filter: &str, qos: u8, client_id: &str) {
        let entry = self.subscriptions.entry(filter.to_string()).or_default();
        // Re-subscribing replaces the QoS, per 3.1.1.
        entry.retain(|s| s.client_id != client_id);
        entry.push(Subscription {
            filter: filter.to_string(),
            qos,
            client_id: client_id.to_string(),
        });
    }

    pub fn unsubscribe(&mut self, filter: &str, client_id: &str) {
        if let Some(entries) = self.subscriptions.get_mut(filter) {
            entries.retain(|s| s.client_id != client_id);
            if entries.is_empty() {
                self.subscriptions.remove(filter);
            }
        }
    }

    /// Drop every subscription a client holds.
    pub fn remove_client(&mut self, client_id: &str) {
        self.subscriptions.retain(|_, entries| {
            entries.retain(|s| s.client_id != client_id);
            !entries.is_empty()
        });
    }

    /// Store or clear (empty payload) the retained message for a topic.
    pub fn retain_message(&mut self, topic: &str, payload: Vec<u8>, qos: u8) {
        if payload.is_empty() {
            self.retained.remove(topic);
        } else {
            self.retained.insert(topic.to_string(), RetainedMessage { payload, qos });
        }
    }

    /// Retained messages visible through a subscription filter.
    pub fn retained_for_filter(&self, filter: &str) -> Vec<(String, RetainedMessage)> {
        self.retained
            .iter()
            .filter(|(topic, _)| Self::matches_filter(topic, filter))
            .map(|(topic, message)| (topic.clone(), message.clone()))
            .collect()
    }
}
