//! Packet dictionary
//!
//! The dictionary is handed over pre-built as JSON (`DictionaryDefinition`).
//! Building it validates every item and yields the template packets used for
//! identification, current-value seeding and command construction.

use crate::conversion::ConversionSpec;
use crate::error::{PacketError, Result};
use crate::item::{ItemRange, ItemState, PacketItem};
use crate::limits::{LimitsSets, LimitsValues, StateColor};
use crate::packet::Packet;
use crate::processor::{StatisticsProcessor, WatermarkProcessor};
use crate::types::{DataType, Endianness, Overflow, ValueType};
use crate::value::Value;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// Serialized definitions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<StateColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hazardous: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsDefinition {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub persistence: u32,
    /// Limits set name -> [rl, yl, yh, rh] or [rl, yl, yh, rh, gl, gh]
    pub values: BTreeMap<String, Vec<f64>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub name: String,
    /// Absent means "append after the previous item"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_offset: Option<i64>,
    pub bit_size: i64,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endianness: Option<Endianness>,
    #[serde(default)]
    pub overflow: Overflow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units_full: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<StateDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_conversion: Option<ConversionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_conversion: Option<ConversionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorDefinition {
    Watermark {
        name: String,
        item: String,
        #[serde(default)]
        value_type: ValueType,
    },
    Statistics {
        name: String,
        item: String,
        samples: usize,
        #[serde(default)]
        value_type: ValueType,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketDefinition {
    pub target: String,
    pub packet: String,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub hazardous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hazardous_description: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub short_buffer_allowed: bool,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
    #[serde(default)]
    pub processors: Vec<ProcessorDefinition>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionaryDefinition {
    #[serde(default)]
    pub telemetry: Vec<PacketDefinition>,
    #[serde(default)]
    pub commands: Vec<PacketDefinition>,
    #[serde(default)]
    pub limits_sets: Vec<String>,
}

impl ItemDefinition {
    fn build(&self, default_endianness: Endianness) -> Result<PacketItem> {
        let mut item = PacketItem::new(
            &self.name,
            self.bit_offset.unwrap_or(0),
            self.bit_size,
            self.data_type,
            self.endianness.unwrap_or(default_endianness),
            self.array_size,
            self.overflow,
        )?;
        item.set_format_string(self.format_string.as_deref())?;
        item.units.clone_from(&self.units);
        item.units_full.clone_from(&self.units_full);
        item.description.clone_from(&self.description);
        item.required = self.required;
        item.hidden = self.hidden;

        if let Some(states) = &self.states {
            let states = states
                .iter()
                .map(|s| {
                    let mut state = ItemState::new(s.name.as_str(), Value::from_json(&s.value));
                    state.color = s.color;
                    state.hazardous.clone_from(&s.hazardous);
                    state
                })
                .collect();
            item.set_states(Some(states));
        }
        if let Some(spec) = &self.read_conversion {
            item.read_conversion = Some(spec.build()?);
        }
        if let Some(spec) = &self.write_conversion {
            item.write_conversion = Some(spec.build()?);
        }
        if let Some(limits) = &self.limits {
            let mut sets = BTreeMap::new();
            for (set, values) in &limits.values {
                sets.insert(set.to_uppercase(), LimitsValues::from_slice(values)?);
            }
            item.limits.set_values(sets)?;
            item.limits.set_persistence_setting(limits.persistence);
            if limits.enabled {
                item.limits.enable();
            }
        }
        if let Some(id) = &self.id_value {
            item.set_id_value(Some(Value::from_json(id)))?;
        }
        let range = match (&self.minimum, &self.maximum) {
            (Some(min), Some(max)) => Some(ItemRange {
                min: Value::from_json(min),
                max: Value::from_json(max),
            }),
            _ => None,
        };
        let default = self.default.as_ref().map(Value::from_json);
        if default.is_some() || range.is_some() {
            item.set_default_and_range(default, range)?;
        }
        Ok(item)
    }
}

impl PacketDefinition {
    /// Build a template packet; telemetry packets gain the received-time items
    pub fn build(&self, telemetry: bool) -> Result<Packet> {
        let mut packet = Packet::new(&self.target, &self.packet, self.endianness);
        packet.description.clone_from(&self.description);
        packet.hazardous = self.hazardous;
        packet.hazardous_description.clone_from(&self.hazardous_description);
        packet.disabled = self.disabled;
        packet.hidden = self.hidden;
        packet.extra.clone_from(&self.extra);
        packet.short_buffer_allowed(self.short_buffer_allowed);

        for def in &self.items {
            let item = def.build(self.endianness)?;
            if def.bit_offset.is_some() {
                packet.define(item);
            } else {
                packet.append(item)?;
            }
        }
        if telemetry {
            packet.add_received_items()?;
        }
        for def in &self.processors {
            match def {
                ProcessorDefinition::Watermark {
                    name,
                    item,
                    value_type,
                } => packet.add_processor(Box::new(WatermarkProcessor::new(name, item, *value_type))),
                ProcessorDefinition::Statistics {
                    name,
                    item,
                    samples,
                    value_type,
                } => packet.add_processor(Box::new(StatisticsProcessor::new(
                    name,
                    item,
                    *samples,
                    *value_type,
                ))),
            }
        }
        Ok(packet)
    }
}

// ============================================================================
// Dictionary
// ============================================================================

/// Parameters for building a command
pub type CommandParams = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    /// Target -> packets in declaration order
    telemetry: BTreeMap<String, Vec<Packet>>,
    commands: BTreeMap<String, Vec<Packet>>,
    limits_sets: LimitsSets,
    warnings: Vec<String>,
}

impl Dictionary {
    pub fn from_definition(definition: &DictionaryDefinition) -> Result<Self> {
        let mut dictionary = Self::default();
        for name in &definition.limits_sets {
            dictionary.limits_sets.add(name);
        }
        for def in &definition.telemetry {
            let packet = def.build(true)?;
            dictionary.register_limits_sets(&packet);
            dictionary.warnings.extend(packet.check_bit_offsets());
            push_packet(&mut dictionary.telemetry, packet);
        }
        for def in &definition.commands {
            let packet = def.build(false)?;
            dictionary.warnings.extend(packet.check_bit_offsets());
            push_packet(&mut dictionary.commands, packet);
        }
        for warning in &dictionary.warnings {
            warn!("{}", warning);
        }
        info!(
            "Dictionary loaded: {} telemetry packets, {} command packets",
            dictionary.telemetry.values().map(Vec::len).sum::<usize>(),
            dictionary.commands.values().map(Vec::len).sum::<usize>()
        );
        Ok(dictionary)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: DictionaryDefinition = serde_json::from_str(json)?;
        Self::from_definition(&definition)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading dictionary from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn register_limits_sets(&mut self, packet: &Packet) {
        for item in packet.sorted_items() {
            if let Some(values) = item.limits.values() {
                for set in values.keys() {
                    self.limits_sets.add(set);
                }
            }
        }
    }

    /// Overlap warnings gathered while building
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn limits_sets(&self) -> &LimitsSets {
        &self.limits_sets
    }

    pub fn limits_sets_mut(&mut self) -> &mut LimitsSets {
        &mut self.limits_sets
    }

    pub fn target_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .telemetry
            .keys()
            .chain(self.commands.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    // ========== Lookup ==========

    pub fn telemetry_packets(&self, target: &str) -> Result<&[Packet]> {
        lookup_target(&self.telemetry, target)
    }

    pub fn command_packets(&self, target: &str) -> Result<&[Packet]> {
        lookup_target(&self.commands, target)
    }

    pub fn telemetry(&self, target: &str, packet: &str) -> Result<&Packet> {
        lookup_packet(&self.telemetry, target, packet)
    }

    pub fn command(&self, target: &str, packet: &str) -> Result<&Packet> {
        lookup_packet(&self.commands, target, packet)
    }

    /// Every telemetry packet across all targets
    pub fn all_telemetry(&self) -> impl Iterator<Item = &Packet> {
        self.telemetry.values().flatten()
    }

    // ========== Identification ==========

    /// First telemetry packet (declaration order) of `targets` matching `buffer`
    pub fn identify_tlm(&self, buffer: &[u8], targets: &[String]) -> Option<&Packet> {
        identify(&self.telemetry, buffer, targets)
    }

    pub fn identify_cmd(&self, buffer: &[u8], targets: &[String]) -> Option<&Packet> {
        identify(&self.commands, buffer, targets)
    }

    // ========== Commands ==========

    /// Build a command from its template
    ///
    /// Defaults are restored first, then each parameter is written as
    /// CONVERTED (or RAW when `raw`). Required parameters must be present;
    /// range checks apply to CONVERTED numeric values when `range_check`.
    pub fn build_cmd(
        &self,
        target: &str,
        packet: &str,
        params: &CommandParams,
        range_check: bool,
        raw: bool,
    ) -> Result<Packet> {
        let template = self.command(target, packet)?;
        let mut command = template.clone();
        command.restore_defaults()?;

        for item in template.sorted_items() {
            if item.required && !params.keys().any(|k| k.eq_ignore_ascii_case(item.name())) {
                return Err(PacketError::MissingParameter {
                    target: target.to_uppercase(),
                    packet: packet.to_uppercase(),
                    item: item.name().to_string(),
                });
            }
        }

        let value_type = if raw {
            ValueType::Raw
        } else {
            ValueType::Converted
        };
        for (name, value) in params {
            let item = command.get_item(name)?;
            if range_check && !raw && item.states().is_none() {
                item.check_range(value)?;
            }
            command.write(name, value, value_type)?;
        }
        command.set_received_time(Some(Utc::now()));
        command.increment_received_count();
        Ok(command)
    }
}

fn push_packet(map: &mut BTreeMap<String, Vec<Packet>>, packet: Packet) {
    let target = packet.target_name().unwrap_or_default().to_string();
    let packets = map.entry(target).or_default();
    if let Some(pos) = packets
        .iter()
        .position(|p| p.packet_name() == packet.packet_name())
    {
        packets[pos] = packet;
    } else {
        packets.push(packet);
    }
}

fn lookup_target<'a>(map: &'a BTreeMap<String, Vec<Packet>>, target: &str) -> Result<&'a [Packet]> {
    map.get(&target.to_uppercase())
        .map(Vec::as_slice)
        .ok_or_else(|| PacketError::TargetNotFound(target.to_uppercase()))
}

fn lookup_packet<'a>(
    map: &'a BTreeMap<String, Vec<Packet>>,
    target: &str,
    packet: &str,
) -> Result<&'a Packet> {
    let upper = packet.to_uppercase();
    lookup_target(map, target)?
        .iter()
        .find(|p| p.packet_name() == Some(upper.as_str()))
        .ok_or_else(|| PacketError::PacketNotFound {
            target: target.to_uppercase(),
            packet: upper,
        })
}

fn identify<'a>(
    map: &'a BTreeMap<String, Vec<Packet>>,
    buffer: &[u8],
    targets: &[String],
) -> Option<&'a Packet> {
    targets.iter().find_map(|target| {
        map.get(&target.to_uppercase())?
            .iter()
            .find(|packet| packet.identify(buffer))
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> DictionaryDefinition {
        serde_json::from_value(json!({
            "telemetry": [
                {
                    "target": "INST",
                    "packet": "HEALTH_STATUS",
                    "items": [
                        { "name": "PKTID", "bit_size": 8, "data_type": "UINT", "id_value": 1 },
                        { "name": "TEMP1", "bit_size": 16, "data_type": "UINT",
                          "read_conversion": { "type": "polynomial", "coeffs": [0.0, 0.5] },
                          "units": "C",
                          "limits": { "values": { "DEFAULT": [1.0, 2.0, 80.0, 90.0], "TVAC": [-10.0, 0.0, 100.0, 110.0] } } }
                    ]
                },
                {
                    "target": "INST",
                    "packet": "ADCS",
                    "items": [
                        { "name": "PKTID", "bit_size": 8, "data_type": "UINT", "id_value": 2 },
                        { "name": "Q1", "bit_size": 32, "data_type": "FLOAT" }
                    ]
                }
            ],
            "commands": [
                {
                    "target": "INST",
                    "packet": "COLLECT",
                    "hazardous": false,
                    "items": [
                        { "name": "OPCODE", "bit_size": 8, "data_type": "UINT", "id_value": 4, "default": 4 },
                        { "name": "TYPE", "bit_size": 8, "data_type": "UINT", "required": true,
                          "states": [ { "name": "NORMAL", "value": 0 }, { "name": "SPECIAL", "value": 1, "hazardous": "Special collect" } ] },
                        { "name": "DURATION", "bit_size": 32, "data_type": "FLOAT", "default": 1.0,
                          "minimum": 0.0, "maximum": 10.0 }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_and_lookup() {
        let dict = Dictionary::from_definition(&definition()).unwrap();
        assert_eq!(dict.target_names(), vec!["INST"]);
        let hs = dict.telemetry("inst", "health_status").unwrap();
        assert_eq!(hs.defined_length(), 3);
        assert!(hs.get_item("RECEIVED_COUNT").is_ok());
        assert_eq!(hs.limits_items().len(), 1);
        assert!(dict.limits_sets().names().any(|s| s == "TVAC"));
        assert!(dict.warnings().is_empty());
        assert_eq!(
            dict.telemetry("INST", "NOPE").unwrap_err().to_string(),
            "Packet 'INST NOPE' does not exist"
        );
        assert_eq!(
            dict.telemetry("OTHER", "HS").unwrap_err(),
            PacketError::TargetNotFound("OTHER".to_string())
        );
    }

    #[test]
    fn test_identify_first_match() {
        let dict = Dictionary::from_definition(&definition()).unwrap();
        let targets = vec!["INST".to_string()];
        let found = dict.identify_tlm(&[2, 0, 0, 0, 0], &targets).unwrap();
        assert_eq!(found.packet_name(), Some("ADCS"));
        assert!(dict.identify_tlm(&[9, 0, 0], &targets).is_none());
        assert!(dict.identify_tlm(&[1], &[]).is_none());
    }

    #[test]
    fn test_build_cmd_defaults_and_range() {
        let dict = Dictionary::from_definition(&definition()).unwrap();
        let mut params = CommandParams::new();
        params.insert("TYPE".to_string(), Value::from("SPECIAL"));
        let cmd = dict.build_cmd("INST", "COLLECT", &params, true, false).unwrap();
        assert_eq!(cmd.read("OPCODE", ValueType::Raw).unwrap(), Value::UInt(4));
        assert_eq!(cmd.read("DURATION", ValueType::Raw).unwrap(), Value::Float(1.0));
        assert_eq!(cmd.hazardous_reason().unwrap(), "TYPE: Special collect");

        params.insert("DURATION".to_string(), Value::Float(11.0));
        assert_eq!(
            dict.build_cmd("INST", "COLLECT", &params, true, false)
                .unwrap_err()
                .to_string(),
            "Command parameter 'DURATION' = 11.0 not in valid range of 0.0 to 10.0"
        );
        assert!(dict.build_cmd("INST", "COLLECT", &params, false, false).is_ok());
    }

    #[test]
    fn test_build_cmd_requires_parameters() {
        let dict = Dictionary::from_definition(&definition()).unwrap();
        let err = dict
            .build_cmd("INST", "COLLECT", &CommandParams::new(), true, false)
            .unwrap_err();
        assert!(matches!(err, PacketError::MissingParameter { ref item, .. } if item == "TYPE"));
    }
}
