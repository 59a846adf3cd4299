//! Read and write conversions
//!
//! A conversion maps one value to another and may consult the owning packet
//! (for example to pull the received time). Conversions are shared between the
//! dictionary template and every live clone, so they must be stateless.

use crate::error::{PacketError, Result};
use crate::packet::Packet;
use crate::types::DataType;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub trait Conversion: Send + Sync + fmt::Debug {
    fn call(&self, value: &Value, packet: &Packet, buffer: &[u8]) -> Result<Value>;

    /// Data type produced, when it differs from the item's own
    fn converted_type(&self) -> Option<DataType> {
        None
    }

    /// Bit size produced, when meaningful
    fn converted_bit_size(&self) -> Option<i64> {
        None
    }
}

/// Apply a conversion to a scalar or element-wise over an array
pub fn convert_value(
    conversion: &dyn Conversion,
    value: &Value,
    packet: &Packet,
    buffer: &[u8],
) -> Result<Value> {
    match value {
        Value::Array(values) => values
            .iter()
            .map(|v| conversion.call(v, packet, buffer))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => conversion.call(other, packet, buffer),
    }
}

// ============================================================================
// Polynomial
// ============================================================================

/// `c0 + c1*x + c2*x^2 + ...`
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialConversion {
    coeffs: Vec<f64>,
}

impl PolynomialConversion {
    pub fn new(coeffs: Vec<f64>) -> Result<Self> {
        if coeffs.is_empty() {
            return Err(PacketError::Conversion(
                "polynomial conversion needs at least one coefficient".to_string(),
            ));
        }
        Ok(Self { coeffs })
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        // Horner
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

impl Conversion for PolynomialConversion {
    fn call(&self, value: &Value, _packet: &Packet, _buffer: &[u8]) -> Result<Value> {
        let x = value.as_f64().ok_or_else(|| {
            PacketError::Conversion(format!("polynomial conversion of non-numeric value {}", value))
        })?;
        Ok(Value::Float(self.evaluate(x)))
    }

    fn converted_type(&self) -> Option<DataType> {
        Some(DataType::Float)
    }

    fn converted_bit_size(&self) -> Option<i64> {
        Some(64)
    }
}

// ============================================================================
// Closure
// ============================================================================

type ConversionFn = dyn Fn(&Value) -> Result<Value> + Send + Sync;

/// Stateless conversion backed by a closure
#[derive(Clone)]
pub struct FnConversion {
    name: String,
    func: Arc<ConversionFn>,
}

impl FnConversion {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConversion")
            .field("name", &self.name)
            .finish()
    }
}

impl Conversion for FnConversion {
    fn call(&self, value: &Value, _packet: &Packet, _buffer: &[u8]) -> Result<Value> {
        (self.func)(value)
    }
}

// ============================================================================
// Received time / count
// ============================================================================

/// Packet received time as float seconds since the epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedTimeSecondsConversion;

impl Conversion for ReceivedTimeSecondsConversion {
    fn call(&self, _value: &Value, packet: &Packet, _buffer: &[u8]) -> Result<Value> {
        Ok(match packet.received_time() {
            Some(time) => Value::Float(time.timestamp_micros() as f64 / 1_000_000.0),
            None => Value::Float(0.0),
        })
    }

    fn converted_type(&self) -> Option<DataType> {
        Some(DataType::Float)
    }

    fn converted_bit_size(&self) -> Option<i64> {
        Some(64)
    }
}

/// Packet received time as `YYYY/MM/DD HH:MM:SS.mmm`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedTimeFormattedConversion;

impl Conversion for ReceivedTimeFormattedConversion {
    fn call(&self, _value: &Value, packet: &Packet, _buffer: &[u8]) -> Result<Value> {
        Ok(match packet.received_time() {
            Some(time) => Value::String(time.format("%Y/%m/%d %H:%M:%S%.3f").to_string()),
            None => Value::String("No Packet Received Time".to_string()),
        })
    }

    fn converted_type(&self) -> Option<DataType> {
        Some(DataType::String)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedCountConversion;

impl Conversion for ReceivedCountConversion {
    fn call(&self, _value: &Value, packet: &Packet, _buffer: &[u8]) -> Result<Value> {
        Ok(Value::UInt(packet.received_count()))
    }

    fn converted_type(&self) -> Option<DataType> {
        Some(DataType::Uint)
    }

    fn converted_bit_size(&self) -> Option<i64> {
        Some(32)
    }
}

// ============================================================================
// Serialized form
// ============================================================================

/// Conversions that can be expressed in a serialized dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionSpec {
    Polynomial { coeffs: Vec<f64> },
    ReceivedTimeSeconds,
    ReceivedTimeFormatted,
    ReceivedCount,
    Processor { processor: String, result: String },
}

impl ConversionSpec {
    pub fn build(&self) -> Result<Arc<dyn Conversion>> {
        Ok(match self {
            Self::Polynomial { coeffs } => Arc::new(PolynomialConversion::new(coeffs.clone())?),
            Self::ReceivedTimeSeconds => Arc::new(ReceivedTimeSecondsConversion),
            Self::ReceivedTimeFormatted => Arc::new(ReceivedTimeFormattedConversion),
            Self::ReceivedCount => Arc::new(ReceivedCountConversion),
            Self::Processor { processor, result } => {
                Arc::new(crate::processor::ProcessorConversion::new(processor, result))
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::Endianness;

    #[test]
    fn test_polynomial() {
        let poly = PolynomialConversion::new(vec![10.0, 0.5, 2.0]).unwrap();
        assert_eq!(poly.evaluate(2.0), 10.0 + 1.0 + 8.0);
        assert!(PolynomialConversion::new(vec![]).is_err());
    }

    #[test]
    fn test_conversions_against_packet() {
        let mut packet = Packet::new("INST", "HEALTH_STATUS", Endianness::BigEndian);
        let poly = PolynomialConversion::new(vec![1.0, 2.0]).unwrap();
        let buffer = packet.buffer().to_vec();
        assert_eq!(
            poly.call(&Value::UInt(3), &packet, &buffer).unwrap(),
            Value::Float(7.0)
        );
        assert_eq!(
            convert_value(&poly, &Value::Array(vec![Value::Int(0), Value::Int(1)]), &packet, &buffer)
                .unwrap(),
            Value::Array(vec![Value::Float(1.0), Value::Float(3.0)])
        );

        packet.set_received_count(4);
        assert_eq!(
            ReceivedCountConversion.call(&Value::Null, &packet, &buffer).unwrap(),
            Value::UInt(4)
        );
        assert_eq!(
            ReceivedTimeFormattedConversion
                .call(&Value::Null, &packet, &buffer)
                .unwrap(),
            Value::from("No Packet Received Time")
        );
    }

    #[test]
    fn test_fn_conversion() {
        let double = FnConversion::new("double", |v| {
            Ok(Value::Int(v.as_i128().unwrap_or(0) as i64 * 2))
        });
        let packet = Packet::new("INST", "P", Endianness::BigEndian);
        assert_eq!(double.call(&Value::Int(21), &packet, &[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_conversion_spec_serde() {
        let spec: ConversionSpec =
            serde_json::from_str(r#"{"type":"polynomial","coeffs":[0.0,1.5]}"#).unwrap();
        assert!(spec.build().is_ok());
        let spec: ConversionSpec = serde_json::from_str(r#"{"type":"received_count"}"#).unwrap();
        assert_eq!(spec, ConversionSpec::ReceivedCount);
    }
}
