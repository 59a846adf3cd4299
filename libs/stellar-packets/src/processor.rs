//! Packet processors
//!
//! Processors run each time a packet receives a new buffer and accumulate
//! derived values (watermarks, running statistics). Their results are exposed
//! to DERIVED items through `ProcessorConversion`.

use crate::conversion::Conversion;
use crate::error::{PacketError, Result};
use crate::packet::Packet;
use crate::types::ValueType;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;

pub trait Processor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn call(&mut self, packet: &Packet, buffer: &[u8]);

    /// Forget accumulated state
    fn reset(&mut self);

    fn results(&self) -> &FxHashMap<String, Value>;

    fn box_clone(&self) -> Box<dyn Processor>;
}

impl Clone for Box<dyn Processor> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

// ============================================================================
// Watermark
// ============================================================================

/// Tracks the high and low water marks of one item
#[derive(Debug, Clone)]
pub struct WatermarkProcessor {
    name: String,
    item_name: String,
    value_type: ValueType,
    results: FxHashMap<String, Value>,
}

impl WatermarkProcessor {
    pub fn new(name: &str, item_name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_uppercase(),
            item_name: item_name.to_uppercase(),
            value_type,
            results: FxHashMap::default(),
        }
    }
}

impl Processor for WatermarkProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&mut self, packet: &Packet, buffer: &[u8]) {
        let Ok(value) = packet.read_with_buffer(&self.item_name, self.value_type, buffer) else {
            return;
        };
        let Some(v) = value.as_f64() else {
            return;
        };
        let high = self.results.get("HIGH_WATER").and_then(Value::as_f64);
        if high.map_or(true, |high| v > high) {
            self.results.insert("HIGH_WATER".to_string(), value.clone());
        }
        let low = self.results.get("LOW_WATER").and_then(Value::as_f64);
        if low.map_or(true, |low| v < low) {
            self.results.insert("LOW_WATER".to_string(), value);
        }
    }

    fn reset(&mut self) {
        self.results.clear();
    }

    fn results(&self) -> &FxHashMap<String, Value> {
        &self.results
    }

    fn box_clone(&self) -> Box<dyn Processor> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Rolling min/max/mean/stddev over the last `samples_to_save` values
#[derive(Debug, Clone)]
pub struct StatisticsProcessor {
    name: String,
    item_name: String,
    samples_to_save: usize,
    value_type: ValueType,
    samples: VecDeque<f64>,
    results: FxHashMap<String, Value>,
}

impl StatisticsProcessor {
    pub fn new(name: &str, item_name: &str, samples_to_save: usize, value_type: ValueType) -> Self {
        Self {
            name: name.to_uppercase(),
            item_name: item_name.to_uppercase(),
            samples_to_save: samples_to_save.max(1),
            value_type,
            samples: VecDeque::new(),
            results: FxHashMap::default(),
        }
    }
}

impl Processor for StatisticsProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&mut self, packet: &Packet, buffer: &[u8]) {
        let Some(v) = packet
            .read_with_buffer(&self.item_name, self.value_type, buffer)
            .ok()
            .and_then(|value| value.as_f64())
        else {
            return;
        };
        self.samples.push_back(v);
        while self.samples.len() > self.samples_to_save {
            self.samples.pop_front();
        }

        let n = self.samples.len() as f64;
        let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = self.samples.iter().sum::<f64>() / n;
        let variance = self.samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        self.results.insert("MIN".to_string(), Value::Float(min));
        self.results.insert("MAX".to_string(), Value::Float(max));
        self.results.insert("MEAN".to_string(), Value::Float(mean));
        self.results.insert("STDDEV".to_string(), Value::Float(variance.sqrt()));
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.results.clear();
    }

    fn results(&self) -> &FxHashMap<String, Value> {
        &self.results
    }

    fn box_clone(&self) -> Box<dyn Processor> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Conversion exposing a processor result
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProcessorConversion {
    processor_name: String,
    result_name: String,
}

impl ProcessorConversion {
    pub fn new(processor_name: &str, result_name: &str) -> Self {
        Self {
            processor_name: processor_name.to_uppercase(),
            result_name: result_name.to_uppercase(),
        }
    }
}

impl Conversion for ProcessorConversion {
    fn call(&self, _value: &Value, packet: &Packet, _buffer: &[u8]) -> Result<Value> {
        let processor = packet.processor(&self.processor_name).ok_or_else(|| {
            PacketError::Conversion(format!("Unknown processor {}", self.processor_name))
        })?;
        Ok(processor
            .results()
            .get(&self.result_name)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::{DataType, Endianness, Overflow};
    use std::sync::Arc;

    fn packet() -> Packet {
        let mut p = Packet::new("INST", "HEALTH_STATUS", Endianness::BigEndian);
        p.append_item("TEMP", 8, DataType::Uint, None, None, Overflow::Error).unwrap();
        p
    }

    #[test]
    fn test_watermark_tracks_extremes_and_resets() {
        let mut p = packet();
        p.add_processor(Box::new(WatermarkProcessor::new("TEMP_WATER", "TEMP", ValueType::Raw)));
        for v in [5u8, 9, 2, 7] {
            p.set_buffer(vec![v]);
        }
        let results = p.processor("TEMP_WATER").unwrap().results();
        assert_eq!(results.get("HIGH_WATER"), Some(&Value::UInt(9)));
        assert_eq!(results.get("LOW_WATER"), Some(&Value::UInt(2)));

        p.reset();
        assert!(p.processor("TEMP_WATER").unwrap().results().is_empty());
    }

    #[test]
    fn test_statistics_window_and_conversion() {
        let mut p = packet();
        p.add_processor(Box::new(StatisticsProcessor::new("TEMP_STATS", "TEMP", 2, ValueType::Raw)));
        let mut derived = crate::item::PacketItem::new(
            "TEMP_MAX",
            0,
            0,
            DataType::Derived,
            Endianness::BigEndian,
            None,
            Overflow::Error,
        )
        .unwrap();
        derived.read_conversion = Some(Arc::new(ProcessorConversion::new("TEMP_STATS", "MAX")));
        p.define(derived);

        for v in [10u8, 20, 4] {
            p.set_buffer(vec![v]);
        }
        // Only the last two samples are kept
        assert_eq!(p.read("TEMP_MAX", ValueType::Converted).unwrap(), Value::Float(20.0));
        let results = p.processor("TEMP_STATS").unwrap().results();
        assert_eq!(results.get("MIN"), Some(&Value::Float(4.0)));
        assert_eq!(results.get("MEAN"), Some(&Value::Float(12.0)));
    }
}
