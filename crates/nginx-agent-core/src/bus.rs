//! Topic to subscriber fan-out.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::error::{PipeError, PipeResult};
use crate::message::Message;
use crate::plugin::BoxedPlugin;

/// Maps each topic to the ordered list of plugins subscribed to it.
///
/// The capacity bounds the total number of subscriptions across all topics.
pub struct MessageBus {
    capacity: usize,
    len: usize,
    handlers: HashMap<String, Vec<BoxedPlugin>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            handlers: HashMap::new(),
        }
    }

    /// Adds `plugin` to the subscribers of `topic`.
    pub fn subscribe(&mut self, topic: impl Into<String>, plugin: BoxedPlugin) -> PipeResult<()> {
        let topic = topic.into();
        if self.len >= self.capacity {
            return Err(PipeError::BusCapacity {
                capacity: self.capacity,
                topic,
            });
        }
        self.handlers.entry(topic).or_default().push(plugin);
        self.len += 1;
        Ok(())
    }

    /// Removes every subscription held by the plugin named `name`.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&mut self, name: &str) -> usize {
        let mut removed = 0;
        self.handlers.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|plugin| plugin.info().name != name);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        self.len -= removed;
        removed
    }

    /// Awaits every subscriber of the message topic, one after another.
    pub async fn publish(&self, message: &Message) {
        let Some(subscribers) = self.handlers.get(message.topic()) else {
            trace!(topic = message.topic(), "no subscribers");
            return;
        };
        for plugin in subscribers {
            plugin.process(message).await;
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.get(topic).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<_> = self.handlers.keys().collect();
        topics.sort();
        f.debug_struct("MessageBus")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("topics", &topics)
            .finish()
    }
}
