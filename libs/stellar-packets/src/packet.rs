//! Packet - typed access to a structure plus conversions and limits
//!
//! # Representations
//!
//! | repr        | derivation                                                  |
//! |-------------|-------------------------------------------------------------|
//! | RAW         | bits extracted from the buffer                              |
//! | CONVERTED   | read conversion applied to RAW, then state-name lookup      |
//! | FORMATTED   | CONVERTED through the format string (state names untouched) |
//! | WITH_UNITS  | FORMATTED + " " + units (state names untouched)             |
//!
//! CONVERTED results of read conversions are cached per item while reads
//! target the packet's own buffer. Any write or buffer change clears the
//! cache, and cached values are cloned on every hit.

use crate::conversion::{
    convert_value, ReceivedCountConversion, ReceivedTimeFormattedConversion,
    ReceivedTimeSecondsConversion,
};
use crate::error::{PacketError, Result};
use crate::item::PacketItem;
use crate::limits::{LimitsCallback, LimitsState, LimitsTransition};
use crate::processor::Processor;
use crate::structure::Structure;
use crate::types::{DataType, Endianness, Overflow, ValueType};
use crate::value::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Target of the system metadata packet, which is never reset
pub const SYSTEM_TARGET: &str = "SYSTEM";
pub const META_PACKET: &str = "META";

const VALUE_TYPES: [ValueType; 4] = [
    ValueType::Raw,
    ValueType::Converted,
    ValueType::Formatted,
    ValueType::WithUnits,
];

/// (target, packet, item, state) for out-of-limits items
pub type OutOfLimits = (String, String, String, LimitsState);

pub struct Packet {
    target_name: Option<String>,
    packet_name: Option<String>,
    structure: Structure,
    pub description: Option<String>,
    received_time: Option<DateTime<Utc>>,
    received_count: u64,
    pub stored: bool,
    pub hazardous: bool,
    pub hazardous_description: Option<String>,
    pub disabled: bool,
    pub hidden: bool,
    pub extra: BTreeMap<String, serde_json::Value>,
    limits_items: Vec<String>,
    processors: Vec<Box<dyn Processor>>,
    overrides: FxHashMap<(String, ValueType), Value>,
    stale: bool,
    limits_change_callback: Option<Arc<dyn LimitsCallback>>,
    read_conversion_cache: Mutex<FxHashMap<String, Value>>,
}

impl Clone for Packet {
    fn clone(&self) -> Self {
        Self {
            target_name: self.target_name.clone(),
            packet_name: self.packet_name.clone(),
            structure: self.structure.clone(),
            description: self.description.clone(),
            received_time: self.received_time,
            received_count: self.received_count,
            stored: self.stored,
            hazardous: self.hazardous,
            hazardous_description: self.hazardous_description.clone(),
            disabled: self.disabled,
            hidden: self.hidden,
            extra: self.extra.clone(),
            limits_items: self.limits_items.clone(),
            processors: self.processors.clone(),
            overrides: self.overrides.clone(),
            stale: self.stale,
            limits_change_callback: self.limits_change_callback.clone(),
            // Clones never share cached conversions
            read_conversion_cache: Mutex::new(FxHashMap::default()),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("target_name", &self.target_name)
            .field("packet_name", &self.packet_name)
            .field("items", &self.structure.sorted_items().len())
            .field("length", &self.structure.len())
            .field("received_count", &self.received_count)
            .finish()
    }
}

impl Packet {
    pub fn new(target_name: &str, packet_name: &str, default_endianness: Endianness) -> Self {
        let mut packet = Self::unidentified(default_endianness);
        packet.set_names(Some(target_name), Some(packet_name));
        packet
    }

    /// Packet with no target/packet name yet
    pub fn unidentified(default_endianness: Endianness) -> Self {
        Self {
            target_name: None,
            packet_name: None,
            structure: Structure::new(default_endianness),
            description: None,
            received_time: None,
            received_count: 0,
            stored: false,
            hazardous: false,
            hazardous_description: None,
            disabled: false,
            hidden: false,
            extra: BTreeMap::new(),
            limits_items: Vec::new(),
            processors: Vec::new(),
            overrides: FxHashMap::default(),
            stale: false,
            limits_change_callback: None,
            read_conversion_cache: Mutex::new(FxHashMap::default()),
        }
    }

    // ========== Identity ==========

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn packet_name(&self) -> Option<&str> {
        self.packet_name.as_deref()
    }

    pub fn set_names(&mut self, target_name: Option<&str>, packet_name: Option<&str>) {
        self.target_name = target_name.map(str::to_uppercase);
        self.packet_name = packet_name.map(str::to_uppercase);
    }

    /// Both target and packet names are known
    pub fn identified(&self) -> bool {
        self.target_name.is_some() && self.packet_name.is_some()
    }

    fn display_target(&self) -> &str {
        self.target_name.as_deref().unwrap_or("UNKNOWN")
    }

    fn display_packet(&self) -> &str {
        self.packet_name.as_deref().unwrap_or("UNKNOWN")
    }

    // ========== Buffer / reception ==========

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn buffer(&self) -> &[u8] {
        self.structure.buffer()
    }

    pub fn len(&self) -> usize {
        self.structure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structure.is_empty()
    }

    pub fn defined_length(&self) -> usize {
        self.structure.defined_length()
    }

    pub fn short_buffer_allowed(&mut self, allowed: bool) {
        self.structure.short_buffer_allowed = allowed;
    }

    /// Install a new buffer, clear the cache and run processors
    ///
    /// Length mismatches are logged; the buffer is always accepted.
    pub fn set_buffer(&mut self, buffer: Vec<u8>) {
        let actual = buffer.len();
        if self.structure.set_buffer(buffer).is_err() {
            warn!(
                "{} {} received with actual packet length of {} but defined length of {}",
                self.display_target(),
                self.display_packet(),
                actual,
                self.structure.defined_length()
            );
        }
        self.read_conversion_cache.get_mut().clear();
        self.process();
    }

    pub fn received_time(&self) -> Option<DateTime<Utc>> {
        self.received_time
    }

    pub fn set_received_time(&mut self, time: Option<DateTime<Utc>>) {
        self.received_time = time;
        self.read_conversion_cache.get_mut().clear();
    }

    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    pub fn set_received_count(&mut self, count: u64) {
        self.received_count = count;
        self.read_conversion_cache.get_mut().clear();
    }

    pub fn increment_received_count(&mut self) -> u64 {
        self.received_count = self.received_count.wrapping_add(1);
        self.read_conversion_cache.get_mut().clear();
        self.received_count
    }

    /// Copy for a live current-value entry: same buffer, fresh caches
    pub fn clone_live(&self) -> Self {
        self.clone()
    }

    /// Clear reception stats, cache and processor state
    pub fn reset(&mut self) {
        if self.target_name.as_deref() == Some(SYSTEM_TARGET)
            && self.packet_name.as_deref() == Some(META_PACKET)
        {
            return;
        }
        self.received_time = None;
        self.received_count = 0;
        self.read_conversion_cache.get_mut().clear();
        for processor in self.processors.iter_mut() {
            processor.reset();
        }
    }

    // ========== Definition ==========

    pub fn define(&mut self, item: PacketItem) -> &PacketItem {
        let name = item.name().to_string();
        self.structure.define(item);
        self.update_limits_items_cache();
        let pos = self.structure.position(&name).unwrap_or(0);
        &self.structure.sorted_items()[pos]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn define_item(
        &mut self,
        name: &str,
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        array_size: Option<i64>,
        endianness: Option<Endianness>,
        overflow: Overflow,
    ) -> Result<&PacketItem> {
        let endianness = endianness.unwrap_or(self.structure.default_endianness());
        let item = PacketItem::new(
            name,
            bit_offset,
            bit_size,
            data_type,
            endianness,
            array_size,
            overflow,
        )?;
        Ok(self.define(item))
    }

    pub fn append_item(
        &mut self,
        name: &str,
        bit_size: i64,
        data_type: DataType,
        array_size: Option<i64>,
        endianness: Option<Endianness>,
        overflow: Overflow,
    ) -> Result<&PacketItem> {
        let name = name.to_uppercase();
        self.structure
            .append_item(&name, bit_size, data_type, array_size, endianness, overflow)?;
        self.update_limits_items_cache();
        self.get_item(&name)
    }

    pub fn append(&mut self, item: PacketItem) -> Result<&PacketItem> {
        let name = item.name().to_string();
        self.structure.append(item)?;
        self.update_limits_items_cache();
        self.get_item(&name)
    }

    fn not_found(&self, name: &str) -> PacketError {
        PacketError::ItemNotFound {
            target: self.display_target().to_string(),
            packet: self.display_packet().to_string(),
            item: name.to_uppercase(),
        }
    }

    pub fn get_item(&self, name: &str) -> Result<&PacketItem> {
        self.structure
            .get_item(name)
            .ok_or_else(|| self.not_found(name))
    }

    /// Mutable access for configuration; clears the conversion cache
    pub fn item_mut(&mut self, name: &str) -> Result<&mut PacketItem> {
        self.read_conversion_cache.get_mut().clear();
        let err = self.not_found(name);
        self.structure.get_item_mut(name).ok_or(err)
    }

    pub fn sorted_items(&self) -> &[PacketItem] {
        self.structure.sorted_items()
    }

    /// Items carrying an id value, in layout order
    pub fn id_items(&self) -> Vec<&PacketItem> {
        self.structure
            .sorted_items()
            .iter()
            .filter(|item| item.id_value().is_some())
            .collect()
    }

    /// DERIVED received-time and received-count items
    pub fn add_received_items(&mut self) -> Result<()> {
        let endianness = self.structure.default_endianness();
        let derived = |name: &str| {
            PacketItem::new(name, 0, 0, DataType::Derived, endianness, None, Overflow::Error)
        };

        let mut seconds = derived("RECEIVED_TIMESECONDS")?;
        seconds.read_conversion = Some(Arc::new(ReceivedTimeSecondsConversion));
        seconds.set_format_string(Some("%0.6f"))?;
        seconds.description = Some("Stellar Received Time (UTC, Floating point, Unix epoch)".to_string());
        self.define(seconds);

        let mut formatted = derived("RECEIVED_TIMEFORMATTED")?;
        formatted.read_conversion = Some(Arc::new(ReceivedTimeFormattedConversion));
        formatted.description = Some("Stellar Received Time (Local time zone, Formatted string)".to_string());
        self.define(formatted);

        let mut count = derived("RECEIVED_COUNT")?;
        count.read_conversion = Some(Arc::new(ReceivedCountConversion));
        count.description = Some("Stellar packet received count".to_string());
        self.define(count);
        Ok(())
    }

    // ========== Processors ==========

    pub fn add_processor(&mut self, processor: Box<dyn Processor>) {
        let name = processor.name().to_string();
        self.processors.retain(|p| p.name() != name);
        self.processors.push(processor);
    }

    pub fn processor(&self, name: &str) -> Option<&dyn Processor> {
        let upper = name.to_uppercase();
        self.processors
            .iter()
            .find(|p| p.name() == upper)
            .map(|p| p.as_ref())
    }

    pub fn processors(&self) -> impl Iterator<Item = &dyn Processor> {
        self.processors.iter().map(|p| p.as_ref())
    }

    fn process(&mut self) {
        if self.processors.is_empty() {
            return;
        }
        let mut processors = std::mem::take(&mut self.processors);
        for processor in processors.iter_mut() {
            processor.call(self, self.structure.buffer());
        }
        self.processors = processors;
    }

    // ========== Overrides ==========

    /// Force the value returned for `name`; `None` overrides every representation
    pub fn override_item(
        &mut self,
        name: &str,
        value: Value,
        value_type: Option<ValueType>,
    ) -> Result<()> {
        let item_name = self.get_item(name)?.name().to_string();
        match value_type {
            Some(vt) => {
                self.overrides.insert((item_name, vt), value);
            },
            None => {
                for vt in VALUE_TYPES {
                    self.overrides.insert((item_name.clone(), vt), value.clone());
                }
            },
        }
        Ok(())
    }

    /// Remove overrides for `name`; `None` removes all representations
    pub fn normalize_item(&mut self, name: &str, value_type: Option<ValueType>) -> Result<()> {
        let item_name = self.get_item(name)?.name().to_string();
        match value_type {
            Some(vt) => {
                self.overrides.remove(&(item_name, vt));
            },
            None => self.overrides.retain(|(n, _), _| *n != item_name),
        }
        Ok(())
    }

    pub fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    // ========== Reading ==========

    /// Read `item` in the requested representation
    ///
    /// `buffer` defaults to the packet's own buffer.
    pub fn read_item(
        &self,
        item: &PacketItem,
        value_type: ValueType,
        buffer: Option<&[u8]>,
    ) -> Result<Value> {
        if !self.overrides.is_empty() {
            if let Some(v) = self.overrides.get(&(item.name().to_string(), value_type)) {
                return Ok(v.clone());
            }
        }

        let own_buffer = buffer.is_none();
        let buffer = buffer.unwrap_or(self.structure.buffer());

        if value_type == ValueType::Raw {
            return Structure::read_item_raw(item, buffer);
        }

        let converted = match &item.read_conversion {
            Some(conversion) => {
                let cached = if own_buffer {
                    self.read_conversion_cache.lock().get(item.name()).cloned()
                } else {
                    None
                };
                match cached {
                    Some(v) => v,
                    None => {
                        let raw = Structure::read_item_raw(item, buffer)?;
                        let v = convert_value(conversion.as_ref(), &raw, self, buffer)?;
                        if own_buffer {
                            self.read_conversion_cache
                                .lock()
                                .insert(item.name().to_string(), v.clone());
                        }
                        v
                    },
                }
            },
            None => Structure::read_item_raw(item, buffer)?,
        };

        match converted {
            Value::Array(values) if item.array_size().is_some() => values
                .into_iter()
                .map(|v| Self::render(item, v, value_type))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Self::render(item, other, value_type),
        }
    }

    /// State lookup, then format string and units
    fn render(item: &PacketItem, value: Value, value_type: ValueType) -> Result<Value> {
        if let Some(state) = item.state_name(&value) {
            return Ok(Value::String(state.to_string()));
        }
        if value_type == ValueType::Converted {
            return Ok(value);
        }
        let mut text = match item.format_string() {
            Some(format) if !value.is_null() => crate::format::format_value(format, &value)?,
            _ => value.to_string(),
        };
        if value_type == ValueType::WithUnits {
            if let Some(units) = &item.units {
                text.push(' ');
                text.push_str(units);
            }
        }
        Ok(Value::String(text))
    }

    pub fn read(&self, name: &str, value_type: ValueType) -> Result<Value> {
        let item = self.get_item(name)?;
        self.read_item(item, value_type, None)
    }

    pub fn read_with_buffer(&self, name: &str, value_type: ValueType, buffer: &[u8]) -> Result<Value> {
        let item = self.get_item(name)?;
        self.read_item(item, value_type, Some(buffer))
    }

    /// Read using a representation given by name
    pub fn read_as(&self, name: &str, value_type: &str) -> Result<Value> {
        let value_type = ValueType::parse_for(value_type, "read")?;
        self.read(name, value_type)
    }

    /// (name, value) for every item in layout order
    pub fn read_all(&self, value_type: ValueType) -> Result<Vec<(String, Value)>> {
        self.structure
            .sorted_items()
            .iter()
            .map(|item| Ok((item.name().to_string(), self.read_item(item, value_type, None)?)))
            .collect()
    }

    pub fn read_all_with_limits_states(
        &self,
        value_type: ValueType,
    ) -> Result<Vec<(String, Value, Option<LimitsState>)>> {
        self.structure
            .sorted_items()
            .iter()
            .map(|item| {
                Ok((
                    item.name().to_string(),
                    self.read_item(item, value_type, None)?,
                    item.limits.state(),
                ))
            })
            .collect()
    }

    /// Human readable dump, one item per line; RAW blocks as hex
    pub fn formatted(&self, value_type: ValueType, indent: usize) -> Result<String> {
        let pad = " ".repeat(indent);
        let mut out = String::new();
        for item in self.structure.sorted_items() {
            let value = self.read_item(item, value_type, None)?;
            let dump_block = item.data_type() == DataType::Block
                && (value_type == ValueType::Raw || item.read_conversion.is_none());
            match value {
                Value::Block(bytes) if dump_block => {
                    out.push_str(&format!("{}{}:\n", pad, item.name()));
                    out.push_str(&common::hex::hex_dump(&bytes, indent + 2));
                },
                other => out.push_str(&format!("{}{}: {}\n", pad, item.name(), other)),
            }
        }
        Ok(out)
    }

    /// Decoded form published downstream
    ///
    /// RAW under the item name plus `__C`, `__F`, `__U` and `__L` companions
    /// where the item defines a conversion/states, a format string, units or
    /// a limits state.
    pub fn as_decom_json(&self) -> serde_json::Value {
        let mut data = serde_json::Map::new();
        for item in self.structure.sorted_items() {
            let name = item.name();
            let raw = match self.read_item(item, ValueType::Raw, None) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Skipping {} in decom: {}", name, e);
                    continue;
                },
            };
            data.insert(name.to_string(), raw.to_json());
            if item.read_conversion.is_some() || item.states().is_some() {
                if let Ok(v) = self.read_item(item, ValueType::Converted, None) {
                    data.insert(format!("{}__C", name), v.to_json());
                }
            }
            if item.format_string().is_some() {
                if let Ok(v) = self.read_item(item, ValueType::Formatted, None) {
                    data.insert(format!("{}__F", name), v.to_json());
                }
            }
            if item.units.is_some() {
                if let Ok(v) = self.read_item(item, ValueType::WithUnits, None) {
                    data.insert(format!("{}__U", name), v.to_json());
                }
            }
            if let Some(state) = item.limits.state() {
                data.insert(format!("{}__L", name), json!(state.as_str()));
            }
        }
        json!({
            "target_name": self.display_target(),
            "packet_name": self.display_packet(),
            "received_time": self.received_time.map(|t| t.timestamp_nanos_opt().unwrap_or(0)),
            "received_count": self.received_count,
            "stored": self.stored,
            "json_data": data,
        })
    }

    // ========== Writing ==========

    /// Value that reaches the buffer for a write, or None for DERIVED items
    fn value_for_write(
        &self,
        item: &PacketItem,
        value: &Value,
        value_type: ValueType,
        buffer: &[u8],
    ) -> Result<Option<Value>> {
        match value_type {
            ValueType::Raw => Ok(Some(value.clone())),
            ValueType::Converted => {
                let mut value = value.clone();
                if item.states().is_some() {
                    if let Value::String(name) = &value {
                        match item.state_value(name) {
                            Some(raw) => value = raw.clone(),
                            None if !item.data_type().is_bytes() && value.as_f64().is_none() => {
                                return Err(PacketError::UnknownState {
                                    state: name.clone(),
                                    item: item.name().to_string(),
                                });
                            },
                            None => {},
                        }
                    }
                }
                match &item.write_conversion {
                    Some(conversion) => {
                        value = convert_value(conversion.as_ref(), &value, self, buffer)?;
                    },
                    None if item.data_type() == DataType::Derived => {
                        return Err(PacketError::DerivedWrite(item.name().to_string()));
                    },
                    None => {},
                }
                if item.data_type() == DataType::Derived {
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            },
            ValueType::Formatted | ValueType::WithUnits => {
                Err(PacketError::InvalidWriteType(value_type.to_string()))
            },
        }
    }

    /// Write `value` for `name` into the packet's own buffer
    pub fn write(&mut self, name: &str, value: &Value, value_type: ValueType) -> Result<()> {
        let item = self.get_item(name)?.clone();
        self.read_conversion_cache.get_mut().clear();
        let raw = self.value_for_write(&item, value, value_type, self.structure.buffer())?;
        if let Some(raw) = raw {
            Structure::write_item_raw(&item, &raw, self.structure.buffer_mut())?;
        }
        Ok(())
    }

    /// Write into a caller-supplied buffer
    pub fn write_to(
        &self,
        name: &str,
        value: &Value,
        value_type: ValueType,
        buffer: &mut Vec<u8>,
    ) -> Result<()> {
        let item = self.get_item(name)?;
        if let Some(raw) = self.value_for_write(item, value, value_type, buffer)? {
            Structure::write_item_raw(item, &raw, buffer)?;
        }
        Ok(())
    }

    /// Write using a representation given by name
    pub fn write_as(&mut self, name: &str, value: &Value, value_type: &str) -> Result<()> {
        let value_type = ValueType::parse_for(value_type, "write")?;
        self.write(name, value, value_type)
    }

    /// Write every item's default as CONVERTED
    pub fn restore_defaults(&mut self) -> Result<()> {
        let defaults: Vec<(String, Value)> = self
            .structure
            .sorted_items()
            .iter()
            .filter_map(|item| {
                item.default_value()
                    .map(|v| (item.name().to_string(), v.clone()))
            })
            .collect();
        for (name, value) in defaults {
            self.write(&name, &value, ValueType::Converted)?;
        }
        Ok(())
    }

    /// Hazardous reason for the current buffer: the packet's own flag, or the
    /// first item whose RAW state is marked hazardous
    pub fn hazardous_reason(&self) -> Option<String> {
        if self.hazardous {
            return Some(self.hazardous_description.clone().unwrap_or_default());
        }
        self.structure.sorted_items().iter().find_map(|item| {
            item.states()?;
            let raw = self.read_item(item, ValueType::Raw, None).ok()?;
            item.hazardous_for(&raw)
                .map(|desc| format!("{}: {}", item.name(), desc))
        })
    }

    // ========== Identification ==========

    /// True when every id item's RAW value in `buffer` matches its id value
    pub fn identify(&self, buffer: &[u8]) -> bool {
        self.id_items().iter().all(|item| {
            match (Structure::read_item_raw(item, buffer), item.id_value()) {
                (Ok(value), Some(id)) => value.loose_eq(id),
                _ => false,
            }
        })
    }

    pub fn read_id_values(&self, buffer: &[u8]) -> Vec<Value> {
        self.id_items()
            .iter()
            .map(|item| Structure::read_item_raw(item, buffer).unwrap_or(Value::Null))
            .collect()
    }

    /// Report overlapping item definitions in layout order
    pub fn check_bit_offsets(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut expected: Option<i64> = None;
        let mut previous: Option<&PacketItem> = None;
        for item in self.structure.sorted_items() {
            if let (Some(next), Some(prev)) = (expected, previous) {
                if item.bit_offset() < next {
                    warnings.push(format!(
                        "Bit definition overlap at bit offset {} for packet {} {} items {} and {}",
                        item.bit_offset(),
                        self.display_target(),
                        self.display_packet(),
                        item.name(),
                        prev.name()
                    ));
                }
            }
            expected = Some(next_expected_offset(item));
            previous = Some(item);
        }
        warnings
    }

    // ========== Limits ==========

    pub fn set_limits_change_callback(&mut self, callback: Option<Arc<dyn LimitsCallback>>) {
        self.limits_change_callback = callback;
    }

    /// Recompute which items participate in limits checking
    pub fn update_limits_items_cache(&mut self) {
        self.limits_items = self
            .structure
            .sorted_items()
            .iter()
            .filter(|item| item.limits.values().is_some() || item.has_state_colors())
            .map(|item| item.name().to_string())
            .collect();
    }

    pub fn limits_items(&self) -> Vec<&PacketItem> {
        self.limits_items
            .iter()
            .filter_map(|name| self.structure.get_item(name))
            .collect()
    }

    pub fn enable_limits(&mut self, name: &str) -> Result<()> {
        self.item_mut(name)?.limits.enable();
        Ok(())
    }

    /// Disable limits; a non-STALE state is cleared and reported once
    pub fn disable_limits(&mut self, name: &str) -> Result<()> {
        let transition = self.item_mut(name)?.limits.disable();
        if let Some(t) = transition {
            let item = self.get_item(name)?;
            if let Some(callback) = &self.limits_change_callback {
                callback.limits_change(self, item, t.old_state, &Value::Null, t.should_log);
            }
        }
        Ok(())
    }

    pub fn out_of_limits(&self) -> Vec<OutOfLimits> {
        self.limits_items()
            .into_iter()
            .filter_map(|item| match item.limits.state() {
                Some(state) if item.limits.enabled && state.is_out_of_limits() => Some((
                    self.display_target().to_string(),
                    self.display_packet().to_string(),
                    item.name().to_string(),
                    state,
                )),
                _ => None,
            })
            .collect()
    }

    pub fn set_all_limits_states(&mut self, state: Option<LimitsState>) {
        for item in self.structure.sorted_items_mut() {
            item.limits.set_state(state);
        }
    }

    /// Mark every item STALE until the next check
    pub fn set_stale(&mut self) {
        self.stale = true;
        self.set_all_limits_states(Some(LimitsState::Stale));
    }

    pub fn stale(&self) -> bool {
        self.stale
    }

    /// Evaluate limits of every enabled item against `limits_set`
    pub fn check_limits(&mut self, limits_set: &str, ignore_persistence: bool) {
        if self.stale {
            self.stale = false;
            self.set_all_limits_states(None);
        }

        let mut changes: Vec<(usize, LimitsTransition, Value)> = Vec::new();
        for name in self.limits_items.clone() {
            let Some(pos) = self.structure.position(&name) else {
                continue;
            };
            let item = &self.structure.sorted_items()[pos];
            if !item.limits.enabled {
                continue;
            }
            let value = match self.read_item(item, ValueType::Converted, None) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "{} {} {}: limits check skipped: {}",
                        self.display_target(),
                        self.display_packet(),
                        name,
                        e
                    );
                    continue;
                },
            };

            let observation = if item.states().is_some() {
                Observation::Color(value.as_str().and_then(|s| item.state_color(s)))
            } else {
                match (item.limits.values_for(limits_set), value.as_f64()) {
                    (Some(values), Some(v)) => Observation::Zone(values.zone(v)),
                    _ => continue,
                }
            };

            let limits = &mut self.structure.sorted_items_mut()[pos].limits;
            let transition = match observation {
                Observation::Color(color) => limits.observe_color(color),
                Observation::Zone(zone) => limits.observe_zone(zone, ignore_persistence),
            };
            if let Some(t) = transition {
                changes.push((pos, t, value));
            }
        }

        for (pos, transition, value) in changes {
            let item = &self.structure.sorted_items()[pos];
            if let Some(response) = item.limits.response() {
                response.call(self, item, transition.old_state);
            }
            if let Some(callback) = &self.limits_change_callback {
                callback.limits_change(self, item, transition.old_state, &value, transition.should_log);
            }
        }
    }
}

enum Observation {
    Color(Option<LimitsState>),
    Zone(LimitsState),
}

/// First bit offset the item after `item` may start at without overlapping
fn next_expected_offset(item: &PacketItem) -> i64 {
    let offset = item.bit_offset();
    if let Some(array_size) = item.array_size() {
        return if array_size > 0 {
            offset + array_size
        } else {
            array_size
        };
    }
    let size = item.bit_size();
    if offset > 0
        && crate::accessor::is_little_endian_bitfield(offset, size, item.data_type(), item.endianness())
    {
        // LE bitfields grow toward lower addresses; only the first byte is claimed forward
        let remaining = 8 - offset % 8;
        if size > remaining {
            return offset + remaining;
        }
    }
    if size > 0 {
        offset + size
    } else {
        size
    }
}
