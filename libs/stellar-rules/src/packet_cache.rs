//! Latest decoded packets seen by the rule engine

use crate::evaluator::ValueSource;
use dashmap::DashMap;
use serde_json::{Map, Value as JsonValue};
use stellar_packets::ValueType;

type PacketKey = (String, String);

fn key(target: &str, packet: &str) -> PacketKey {
    (target.to_uppercase(), packet.to_uppercase())
}

/// `json_data` of the newest decom message per packet
#[derive(Debug, Default)]
pub struct PacketCache {
    packets: DashMap<PacketKey, Map<String, JsonValue>>,
}

impl PacketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a decom message; returns false when it lacks names or data
    pub fn add(&self, decom: &JsonValue) -> bool {
        let (Some(target), Some(packet), Some(data)) = (
            decom.get("target_name").and_then(JsonValue::as_str),
            decom.get("packet_name").and_then(JsonValue::as_str),
            decom.get("json_data").and_then(JsonValue::as_object),
        ) else {
            return false;
        };
        self.packets.insert(key(target, packet), data.clone());
        true
    }

    pub fn remove(&self, target: &str, packet: &str) {
        self.packets.remove(&key(target, packet));
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Representation suffixes in decreasing specificity
fn suffixes(value_type: ValueType) -> &'static [&'static str] {
    match value_type {
        ValueType::Raw => &[""],
        ValueType::Converted => &["__C", ""],
        ValueType::Formatted => &["__F", "__C", ""],
        ValueType::WithUnits => &["__U", "__F", "__C", ""],
    }
}

impl ValueSource for PacketCache {
    fn item_value(
        &self,
        target: &str,
        packet: &str,
        item: &str,
        value_type: ValueType,
    ) -> Option<JsonValue> {
        let data = self.packets.get(&key(target, packet))?;
        suffixes(value_type)
            .iter()
            .find_map(|suffix| data.get(&format!("{}{}", item, suffix)).cloned())
    }

    fn limits_state(&self, target: &str, packet: &str, item: &str) -> Option<String> {
        let data = self.packets.get(&key(target, packet))?;
        data.get(&format!("{}__L", item))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }
}
