//! Current value table
//!
//! One live `Arc<Packet>` per (target, packet). Readers clone the `Arc` and
//! work on a consistent snapshot; writers build a modified copy and swap it in
//! while holding the entry's shard lock, so concurrent writers to the same
//! packet are serialized and readers never observe a half-applied update.

use crate::dictionary::Dictionary;
use crate::error::{PacketError, Result};
use crate::packet::Packet;
use crate::types::ValueType;
use crate::value::Value;
use dashmap::DashMap;
use std::sync::Arc;

type PacketKey = (String, String);

#[derive(Debug, Default)]
pub struct CurrentValueTable {
    packets: DashMap<PacketKey, Arc<Packet>>,
}

fn key(target: &str, packet: &str) -> PacketKey {
    (target.to_uppercase(), packet.to_uppercase())
}

impl CurrentValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with a live copy of every telemetry packet
    pub fn from_dictionary(dictionary: &Dictionary) -> Self {
        let table = Self::new();
        for packet in dictionary.all_telemetry() {
            table.insert(packet.clone_live());
        }
        table
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Replace (or add) the entry for the packet's own names
    pub fn insert(&self, packet: Packet) -> Arc<Packet> {
        let entry = Arc::new(packet);
        let k = key(
            entry.target_name().unwrap_or_default(),
            entry.packet_name().unwrap_or_default(),
        );
        self.packets.insert(k, Arc::clone(&entry));
        entry
    }

    pub fn get(&self, target: &str, packet: &str) -> Result<Arc<Packet>> {
        self.packets
            .get(&key(target, packet))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PacketError::PacketNotFound {
                target: target.to_uppercase(),
                packet: packet.to_uppercase(),
            })
    }

    /// Copy-on-write update of one entry
    pub fn modify<R>(
        &self,
        target: &str,
        packet: &str,
        f: impl FnOnce(&mut Packet) -> Result<R>,
    ) -> Result<R> {
        let mut entry = self
            .packets
            .get_mut(&key(target, packet))
            .ok_or_else(|| PacketError::PacketNotFound {
                target: target.to_uppercase(),
                packet: packet.to_uppercase(),
            })?;
        let mut next = entry.value().clone_live();
        let result = f(&mut next)?;
        *entry.value_mut() = Arc::new(next);
        Ok(result)
    }

    pub fn read(&self, target: &str, packet: &str, item: &str, value_type: ValueType) -> Result<Value> {
        self.get(target, packet)?.read(item, value_type)
    }

    /// Force a telemetry value until normalized
    pub fn override_tlm(
        &self,
        target: &str,
        packet: &str,
        item: &str,
        value: Value,
        value_type: Option<ValueType>,
    ) -> Result<()> {
        self.modify(target, packet, |p| p.override_item(item, value, value_type))
    }

    pub fn normalize_tlm(
        &self,
        target: &str,
        packet: &str,
        item: &str,
        value_type: Option<ValueType>,
    ) -> Result<()> {
        self.modify(target, packet, |p| p.normalize_item(item, value_type))
    }

    /// Mark every entry STALE
    pub fn set_all_stale(&self) {
        for mut entry in self.packets.iter_mut() {
            let mut next = entry.value().clone_live();
            next.set_stale();
            *entry.value_mut() = Arc::new(next);
        }
    }

    /// Snapshot of every entry
    pub fn snapshot(&self) -> Vec<Arc<Packet>> {
        self.packets.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::{DataType, Endianness, Overflow};

    fn table() -> CurrentValueTable {
        let mut p = Packet::new("INST", "HEALTH_STATUS", Endianness::BigEndian);
        p.append_item("TEMP1", 16, DataType::Uint, None, None, Overflow::Error).unwrap();
        let t = CurrentValueTable::new();
        t.insert(p);
        t
    }

    #[test]
    fn test_snapshot_is_stable_across_swap() {
        let t = table();
        let before = t.get("inst", "health_status").unwrap();
        t.modify("INST", "HEALTH_STATUS", |p| {
            p.set_buffer(vec![0, 42]);
            Ok(())
        })
        .unwrap();
        assert_eq!(before.read("TEMP1", ValueType::Raw).unwrap(), Value::UInt(0));
        assert_eq!(
            t.read("INST", "HEALTH_STATUS", "TEMP1", ValueType::Raw).unwrap(),
            Value::UInt(42)
        );
    }

    #[test]
    fn test_failed_modify_leaves_entry() {
        let t = table();
        let err = t
            .modify("INST", "HEALTH_STATUS", |p| {
                p.set_buffer(vec![0, 1]);
                p.write("NOPE", &Value::UInt(1), ValueType::Raw)
            })
            .unwrap_err();
        assert!(matches!(err, PacketError::ItemNotFound { .. }));
        assert_eq!(
            t.read("INST", "HEALTH_STATUS", "TEMP1", ValueType::Raw).unwrap(),
            Value::UInt(0)
        );
        assert!(t.get("INST", "OTHER").is_err());
    }

    #[test]
    fn test_override_survives_buffer_updates() {
        let t = table();
        t.override_tlm("INST", "HEALTH_STATUS", "TEMP1", Value::UInt(7), None).unwrap();
        t.modify("INST", "HEALTH_STATUS", |p| {
            p.set_buffer(vec![0, 99]);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            t.read("INST", "HEALTH_STATUS", "TEMP1", ValueType::Converted).unwrap(),
            Value::UInt(7)
        );
        t.normalize_tlm("INST", "HEALTH_STATUS", "TEMP1", None).unwrap();
        assert_eq!(
            t.read("INST", "HEALTH_STATUS", "TEMP1", ValueType::Converted).unwrap(),
            Value::UInt(99)
        );
    }
}
