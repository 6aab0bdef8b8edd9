use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

pub(crate) type SubscriberId = u64;

type Subscriber = (SubscriberId, mpsc::UnboundedSender<Value>);

/// Topic to live subscribers. Only the first and last subscriber of a topic
/// are visible on the wire.
#[derive(Default)]
pub(crate) struct SubscriptionSet {
    topics: HashMap<String, Vec<Subscriber>>,
}

impl SubscriptionSet {
    /// Add a subscriber. Returns true when it is the topic's first.
    pub fn add(&mut self, topic: &str, id: SubscriberId, tx: mpsc::UnboundedSender<Value>) -> bool {
        let subscribers = self.topics.entry(topic.to_string()).or_default();
        subscribers.push((id, tx));
        subscribers.len() == 1
    }

    /// Remove a subscriber. Returns true when it was the topic's last.
    pub fn remove(&mut self, topic: &str, id: SubscriberId) -> bool {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(subscriber, _)| *subscriber != id);
        if subscribers.len() == before {
            return false;
        }
        if subscribers.is_empty() {
            self.topics.remove(topic);
            return true;
        }
        false
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn senders(&self, topic: &str) -> Vec<mpsc::UnboundedSender<Value>> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
