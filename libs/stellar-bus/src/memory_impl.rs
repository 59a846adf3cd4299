//! In-memory bus and status store
//!
//! Topics live behind one mutex paired with a condvar so blocked readers wake
//! on publish. Status hashes use DashMap for concurrent access.

use crate::error::{BusError, Result};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::traits::{Bus, Message, StatusStore};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default number of messages retained per topic
pub const DEFAULT_TOPIC_LEN: usize = 1000;

#[derive(Debug, Default)]
struct TopicLog {
    messages: VecDeque<Message>,
    last_offset: u64,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicLog>,
    closed: bool,
}

/// In-process bus backend
pub struct MemoryBus {
    state: Mutex<BusState>,
    readable: Condvar,
    max_len: usize,
    clock: Arc<dyn TimeProvider>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_TOPIC_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            readable: Condvar::new(),
            max_len: max_len.max(1),
            clock: Arc::new(SystemTimeProvider),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Retained messages of one topic, oldest first
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|log| log.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        MemoryStats {
            topic_count: state.topics.len(),
            message_count: state.topics.values().map(|t| t.messages.len()).sum(),
        }
    }

    fn collect(
        state: &BusState,
        cursors: &[(String, u64)],
        max: usize,
    ) -> Vec<Message> {
        let mut out = Vec::new();
        for (topic, cursor) in cursors {
            let Some(log) = state.topics.get(topic) else {
                continue;
            };
            if let Some(front) = log.messages.front() {
                if *cursor > 0 && front.offset > *cursor {
                    warn!(
                        "Reader on {} fell behind, {} messages trimmed",
                        topic,
                        front.offset - *cursor
                    );
                }
            }
            for msg in log.messages.iter().filter(|m| m.offset >= *cursor) {
                if out.len() >= max {
                    return out;
                }
                out.push(msg.clone());
            }
        }
        out
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory bus usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub topic_count: usize,
    pub message_count: usize,
}

impl Bus for MemoryBus {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let log = state.topics.entry(topic.to_string()).or_default();
        log.last_offset += 1;
        let offset = log.last_offset;
        log.messages.push_back(Message {
            topic: topic.to_string(),
            offset,
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ns: self.clock.now_nanos(),
            payload,
        });
        while log.messages.len() > self.max_len {
            log.messages.pop_front();
        }
        drop(state);
        self.readable.notify_all();
        Ok(offset)
    }

    fn read(
        &self,
        cursors: &[(String, u64)],
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let found = Self::collect(&state, cursors, max.max(1));
            if !found.is_empty() {
                return Ok(found);
            }
            if state.closed {
                return Err(BusError::Closed);
            }
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                return Ok(Self::collect(&state, cursors, max.max(1)));
            }
        }
    }

    fn last_offset(&self, topic: &str) -> u64 {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|log| log.last_offset)
            .unwrap_or(0)
    }

    fn delete_topic(&self, topic: &str) -> bool {
        self.state.lock().topics.remove(topic).is_some()
    }

    fn close(&self) {
        debug!("Memory bus closed");
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

/// In-memory status store
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    hash_store: DashMap<String, DashMap<String, Bytes>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.hash_store.clear();
    }
}

impl StatusStore for MemoryStatusStore {
    fn hash_set(&self, key: &str, field: &str, value: Bytes) -> Result<()> {
        self.hash_store
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        Ok(self
            .hash_store
            .get(key)
            .and_then(|hash| hash.get(field).map(|v| v.clone())))
    }

    fn hash_del(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .hash_store
            .get(key)
            .map(|hash| hash.remove(field).is_some())
            .unwrap_or(false))
    }

    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        Ok(self
            .hash_store
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn del(&self, key: &str) -> Result<bool> {
        Ok(self.hash_store.remove(key).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::time::FixedTimeProvider;
    use tracing_test::traced_test;

    #[test]
    fn test_publish_assigns_offsets_per_topic() {
        let bus = MemoryBus::new().with_clock(Arc::new(FixedTimeProvider::new(42)));
        assert_eq!(bus.publish("A", Bytes::from("1")).unwrap(), 1);
        assert_eq!(bus.publish("A", Bytes::from("2")).unwrap(), 2);
        assert_eq!(bus.publish("B", Bytes::from("x")).unwrap(), 1);
        assert_eq!(bus.last_offset("A"), 2);
        assert_eq!(bus.last_offset("C"), 0);
        assert_eq!(bus.messages("A")[0].timestamp_ns, 42);
    }

    #[test]
    fn test_trim_keeps_newest() {
        let bus = MemoryBus::with_max_len(2);
        for i in 0..5 {
            bus.publish("A", Bytes::from(i.to_string())).unwrap();
        }
        let kept: Vec<u64> = bus.messages("A").iter().map(|m| m.offset).collect();
        assert_eq!(kept, vec![4, 5]);
        assert_eq!(bus.stats().message_count, 2);
    }

    #[test]
    #[traced_test]
    fn test_lagging_reader_warns_about_trimmed() {
        let bus = MemoryBus::with_max_len(2);
        for i in 0..5 {
            bus.publish("A", Bytes::from(i.to_string())).unwrap();
        }
        let got = bus
            .read(&[("A".to_string(), 1)], 10, Duration::from_millis(10))
            .unwrap();
        assert_eq!(got.iter().map(|m| m.offset).collect::<Vec<_>>(), vec![4, 5]);
        assert!(logs_contain("Reader on A fell behind, 3 messages trimmed"));
    }

    #[test]
    fn test_read_times_out_empty() {
        let bus = MemoryBus::new();
        let start = Instant::now();
        let got = bus
            .read(&[("A".to_string(), 1)], 10, Duration::from_millis(50))
            .unwrap();
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_close_unblocks_reader() {
        let bus = Arc::new(MemoryBus::new());
        let reader = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || bus.read(&[("A".to_string(), 1)], 10, Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        bus.close();
        assert!(matches!(reader.join().unwrap(), Err(BusError::Closed)));
        assert!(bus.publish("A", Bytes::new()).is_err());
    }

    #[test]
    fn test_status_store_hash_ops() {
        let store = MemoryStatusStore::new();
        store.hash_set("S", "INST_INT", Bytes::from("{}")).unwrap();
        assert_eq!(store.hash_get("S", "INST_INT").unwrap(), Some(Bytes::from("{}")));
        assert_eq!(store.hash_get_all("S").unwrap().len(), 1);
        assert!(store.hash_del("S", "INST_INT").unwrap());
        assert!(!store.hash_del("S", "INST_INT").unwrap());
        assert!(store.hash_get("S", "INST_INT").unwrap().is_none());
    }
}
