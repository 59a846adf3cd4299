//! Interface and router status records in the status store

use crate::error::Result;
use crate::interface::{ConnectionState, InterfaceStats};
use crate::link::InterfaceLink;
use serde::{Deserialize, Serialize};
use stellar_bus::{Bytes, StatusStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStatus {
    pub name: String,
    pub state: ConnectionState,
    pub clients: u64,
    pub txsize: u64,
    pub rxsize: u64,
    pub txbytes: u64,
    pub rxbytes: u64,
    pub txcnt: u64,
    pub rxcnt: u64,
    pub error: Option<String>,
    pub plugin: Option<String>,
}

impl InterfaceStatus {
    pub fn capture(link: &InterfaceLink, state: ConnectionState, error: Option<String>) -> Self {
        let stats = link.stats();
        Self {
            name: link.name().to_string(),
            state,
            clients: InterfaceStats::get(&stats.num_clients),
            txsize: InterfaceStats::get(&stats.write_queue_size),
            rxsize: InterfaceStats::get(&stats.read_queue_size),
            txbytes: InterfaceStats::get(&stats.bytes_written),
            rxbytes: InterfaceStats::get(&stats.bytes_read),
            txcnt: InterfaceStats::get(&stats.write_count),
            rxcnt: InterfaceStats::get(&stats.read_count),
            error,
            plugin: link.info().plugin.clone(),
        }
    }

    pub fn write(&self, store: &dyn StatusStore, key: &str) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        store.hash_set(key, &self.name, Bytes::from(payload))?;
        Ok(())
    }

    pub fn read(store: &dyn StatusStore, key: &str, name: &str) -> Result<Option<Self>> {
        match store.hash_get(key, name)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn remove(store: &dyn StatusStore, key: &str, name: &str) -> Result<()> {
        store.hash_del(key, name)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::interface::InterfaceInfo;
    use crate::sim::SimInterface;
    use std::sync::Arc;
    use stellar_bus::MemoryStatusStore;

    #[test]
    fn test_status_round_trip_and_remove() {
        let link = InterfaceLink::new(Arc::new(SimInterface::new(
            InterfaceInfo::new("INST_INT", &["INST"]),
            false,
        )));
        link.stats().record_write(12);
        let store = MemoryStatusStore::new();
        let status = InterfaceStatus::capture(&link, ConnectionState::Attempting, None);
        status.write(&store, "DEFAULT__interface_status").unwrap();

        let raw = store
            .hash_get("DEFAULT__interface_status", "INST_INT")
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["state"], "ATTEMPTING");
        assert_eq!(json["txbytes"], 12);
        assert_eq!(json["txcnt"], 1);
        assert!(json["error"].is_null());

        InterfaceStatus::remove(&store, "DEFAULT__interface_status", "INST_INT").unwrap();
        assert!(InterfaceStatus::read(&store, "DEFAULT__interface_status", "INST_INT")
            .unwrap()
            .is_none());
    }
}
