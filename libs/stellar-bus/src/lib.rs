//! Stellar message bus abstraction
//!
//! # Key Components
//!
//! - **Bus trait**: ordered, multi-consumer topics with per-topic offsets
//! - **StatusStore trait**: hash-style key/value store for status records
//! - **TopicKeys**: scope-qualified topic and key naming
//! - **MemoryBus / MemoryStatusStore**: in-process backends

pub mod error;
pub mod memory_impl;
pub mod messages;
pub mod time;
pub mod topics;
pub mod traits;

// Re-exports
pub use bytes::Bytes;
pub use error::{BusError, Result};
pub use memory_impl::{MemoryBus, MemoryStats, MemoryStatusStore};
pub use messages::{LimitsEventMessage, PacketMessage};
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
pub use topics::TopicKeys;
pub use traits::{Bus, BusExt, Message, StatusStore, Subscription};

/// Helper functions for tests and embedded setups
pub mod helpers {
    use super::{Bus, MemoryBus, MemoryStatusStore, StatusStore};
    use std::sync::Arc;

    /// Create an in-memory bus for unit testing
    pub fn create_test_bus() -> Arc<dyn Bus> {
        Arc::new(MemoryBus::new())
    }

    /// Create an in-memory status store for unit testing
    pub fn create_test_store() -> Arc<dyn StatusStore> {
        Arc::new(MemoryStatusStore::new())
    }
}
