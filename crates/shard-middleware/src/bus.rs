//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.

use shard_types::ToolEvent;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ToolEvent>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a tool event to all active subscribers.
    ///
    /// Returns the number of receivers that received the event. Publishing
    /// with no subscribers is not an error: the bus is best-effort and
    /// nothing downstream depends on it existing.
    pub fn publish(&self, event: ToolEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all events on the bus.
    ///
    /// The caller should wrap the returned receiver with a [`TopicSubscriber`]
    /// to filter by tool name, or consume it directly for every event.
    pub fn subscribe(&self) -> broadcast::Receiver<ToolEvent> {
        self.sender.subscribe()
    }

    /// Convenience: subscribe and return a [`TopicSubscriber`] filtered to
    /// the given tool name prefix.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscriber that only delivers events whose `tool_name` starts with the
/// given topic prefix.
pub struct TopicSubscriber {
    topic: String,
    receiver: broadcast::Receiver<ToolEvent>,
}

impl TopicSubscriber {
    /// Wait for the next event that matches this subscriber's topic filter.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn recv(&mut self) -> Option<ToolEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.tool_name.starts_with(&self.topic) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "tool event bus subscriber fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shard_types::ActionId;

    fn make_event(tool_name: &str) -> ToolEvent {
        ToolEvent {
            action_id: ActionId::new("A1"),
            tool_name: tool_name.to_string(),
            success: true,
            output: "ok".to_string(),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = make_event("fs_read");
        bus.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.action_id, event.action_id);
        assert_eq!(received.tool_name, event.tool_name);
    }

    #[tokio::test]
    async fn topic_subscriber_filters() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("fs_");

        // Publish an event that should NOT match.
        bus.publish(make_event("code_search"));
        // Publish an event that SHOULD match.
        let good = make_event("fs_read");
        bus.publish(good.clone());

        let received = sub.recv().await.unwrap();
        assert_eq!(received.tool_name, good.tool_name);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = make_event("shard_manager");
        bus.publish(event.clone());

        assert_eq!(rx1.recv().await.unwrap().tool_name, event.tool_name);
        assert_eq!(rx2.recv().await.unwrap().tool_name, event.tool_name);
    }

    #[test]
    fn publish_no_subscribers_returns_zero() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(make_event("test")), 0);
    }
}
