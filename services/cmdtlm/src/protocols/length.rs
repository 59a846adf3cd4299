//! Length-field framing on top of [`BurstProtocol`]

use super::{BurstProtocol, Protocol, ProtocolResult};
use crate::error::{CmdTlmError, Result};
use stellar_packets::{accessor, DataType, Endianness, Overflow, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LengthField {
    bit_offset: i64,
    bit_size: i64,
    value_offset: i64,
    bytes_per_count: i64,
    endianness: Endianness,
    bytes_needed: usize,
    max_length: Option<u64>,
}

impl LengthField {
    fn reduce(&self, buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
        if buffer.len() < self.bytes_needed {
            return Ok(None);
        }
        let length = accessor::read(
            self.bit_offset,
            self.bit_size,
            DataType::Uint,
            buffer,
            self.endianness,
        )?
        .as_i128()
        .unwrap_or(0);
        if let Some(max) = self.max_length {
            if length > max as i128 {
                return Err(CmdTlmError::protocol(format!(
                    "Length value received larger than max_length: {} > {}",
                    length, max
                )));
            }
        }
        let packet_length = length * self.bytes_per_count as i128 + self.value_offset as i128;
        if packet_length <= 0 {
            return Err(CmdTlmError::protocol(format!(
                "Invalid packet length: {}",
                packet_length
            )));
        }
        let packet_length = packet_length as usize;
        if buffer.len() < packet_length {
            return Ok(None);
        }
        Ok(Some(buffer.drain(..packet_length).collect()))
    }

    fn calculate(&self, buffer_length: usize) -> Result<u64> {
        let length = buffer_length as i64 / self.bytes_per_count - self.value_offset;
        if length < 0 {
            return Err(CmdTlmError::protocol(format!(
                "Calculated length {} is negative",
                length
            )));
        }
        if let Some(max) = self.max_length {
            if length as u64 > max {
                return Err(CmdTlmError::protocol(format!(
                    "Calculated length {} larger than max_length {}",
                    length, max
                )));
            }
        }
        Ok(length as u64)
    }
}

#[derive(Debug)]
pub struct LengthProtocol {
    field: LengthField,
    burst: BurstProtocol,
}

impl LengthProtocol {
    pub fn new(
        bit_offset: i64,
        bit_size: i64,
        value_offset: i64,
        bytes_per_count: i64,
        endianness: Endianness,
        burst: BurstProtocol,
        max_length: Option<u64>,
    ) -> Result<Self> {
        if bit_offset < 0 || bit_size <= 0 || bit_size > 64 {
            return Err(CmdTlmError::config(format!(
                "invalid length field: offset {} size {}",
                bit_offset, bit_size
            )));
        }
        if bytes_per_count <= 0 {
            return Err(CmdTlmError::config(format!(
                "length_bytes_per_count must be positive: {}",
                bytes_per_count
            )));
        }
        let bytes_needed = if endianness == Endianness::BigEndian || bit_offset % 8 == 0 {
            let mut bits = bit_offset + bit_size;
            if bits % 8 != 0 {
                bits += 8;
            }
            ((bits - 1) / 8 + 1) as usize
        } else {
            (bit_offset / 8 + 1) as usize
        };
        Ok(Self {
            field: LengthField {
                bit_offset,
                bit_size,
                value_offset,
                bytes_per_count,
                endianness,
                bytes_needed,
                max_length,
            },
            burst,
        })
    }

    /// Bytes that must be buffered before the length field can be read
    pub fn length_bytes_needed(&self) -> usize {
        self.field.bytes_needed
    }
}

impl Protocol for LengthProtocol {
    fn name(&self) -> &'static str {
        "length"
    }

    fn reset(&mut self) {
        self.burst.reset();
    }

    fn read_data(&mut self, data: &[u8]) -> Result<ProtocolResult> {
        let field = self.field;
        self.burst.read_with(data, |buffer| field.reduce(buffer))
    }

    fn write_data(&mut self, data: Vec<u8>) -> Result<ProtocolResult> {
        let mut data = self.burst.frame(data);
        if self.burst.fill_fields() {
            let length = self.field.calculate(data.len())?;
            accessor::write(
                &Value::UInt(length),
                self.field.bit_offset,
                self.field.bit_size,
                DataType::Uint,
                &mut data,
                self.field.endianness,
                Overflow::Error,
            )?;
        }
        Ok(ProtocolResult::Data(data))
    }
}
