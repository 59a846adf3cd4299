//! Trait definitions for the bus abstraction

use crate::error::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One entry of a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    /// Position within the topic, starting at 1
    pub offset: u64,
    pub id: String,
    pub timestamp_ns: i64,
    pub payload: Bytes,
}

impl Message {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Ordered, at-least-once, multi-consumer topics
///
/// Consumers keep their own cursor per topic; publishing never blocks on a
/// slow consumer. Topics are trimmed to a bounded length, so a consumer that
/// falls far behind silently skips the trimmed entries.
pub trait Bus: Send + Sync + 'static {
    /// Append a message; returns its offset
    fn publish(&self, topic: &str, payload: Bytes) -> Result<u64>;

    /// Messages with `offset >= cursor` for each `(topic, cursor)`, blocking up
    /// to `timeout` while none are available
    ///
    /// Returns an empty vector on timeout and `BusError::Closed` once the bus
    /// has been closed and nothing remains to deliver.
    fn read(&self, cursors: &[(String, u64)], max: usize, timeout: Duration)
        -> Result<Vec<Message>>;

    /// Offset of the newest message, 0 for an empty topic
    fn last_offset(&self, topic: &str) -> u64;

    fn delete_topic(&self, topic: &str) -> bool;

    /// Wake every blocked reader and refuse further publishes
    fn close(&self);
}

/// Serialization helpers for any bus
pub trait BusExt: Bus {
    fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<u64> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, Bytes::from(payload))
    }
}

impl<B: Bus + ?Sized> BusExt for B {}

/// Hash-style key/value store for status records
pub trait StatusStore: Send + Sync + 'static {
    fn hash_set(&self, key: &str, field: &str, value: Bytes) -> Result<()>;

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<Bytes>>;

    fn hash_del(&self, key: &str, field: &str) -> Result<bool>;

    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Bytes>>;

    fn del(&self, key: &str) -> Result<bool>;
}

/// A consumer's cursors over a set of topics
pub struct Subscription {
    bus: Arc<dyn Bus>,
    cursors: Vec<(String, u64)>,
    batch: usize,
}

impl Subscription {
    /// Subscribe starting after the newest existing message of each topic
    pub fn latest(bus: Arc<dyn Bus>, topics: &[String]) -> Self {
        let cursors = topics
            .iter()
            .map(|t| (t.clone(), bus.last_offset(t) + 1))
            .collect();
        Self {
            bus,
            cursors,
            batch: 100,
        }
    }

    /// Subscribe from the oldest retained message of each topic
    pub fn from_start(bus: Arc<dyn Bus>, topics: &[String]) -> Self {
        let cursors = topics.iter().map(|t| (t.clone(), 0)).collect();
        Self {
            bus,
            cursors,
            batch: 100,
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.cursors.iter().map(|(t, _)| t.as_str())
    }

    pub fn add_topic(&mut self, topic: &str) {
        if !self.cursors.iter().any(|(t, _)| t == topic) {
            let next = self.bus.last_offset(topic) + 1;
            self.cursors.push((topic.to_string(), next));
        }
    }

    pub fn remove_topic(&mut self, topic: &str) {
        self.cursors.retain(|(t, _)| t != topic);
    }

    /// Next batch, advancing the cursors past what was returned
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>> {
        let messages = self.bus.read(&self.cursors, self.batch, timeout)?;
        for msg in &messages {
            if let Some((_, cursor)) = self.cursors.iter_mut().find(|(t, _)| *t == msg.topic) {
                *cursor = (*cursor).max(msg.offset + 1);
            }
        }
        Ok(messages)
    }
}
