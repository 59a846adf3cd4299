//! Framing protocols applied between an interface and the packet layer
//!
//! Read data flows through the chain in order; write data in reverse order.

pub mod burst;
pub mod length;

pub use burst::BurstProtocol;
pub use length::LengthProtocol;

use crate::error::{CmdTlmError, Result};
use serde::{Deserialize, Serialize};
use stellar_packets::Endianness;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResult {
    Data(Vec<u8>),
    /// Need more bytes before a packet is complete
    Stop,
    /// Close the connection
    Disconnect,
}

pub trait Protocol: Send {
    fn name(&self) -> &'static str;

    /// Clear buffered state, called on every (re)connect
    fn reset(&mut self);

    /// Feed bytes in; empty `data` asks for a packet already buffered
    fn read_data(&mut self, data: &[u8]) -> Result<ProtocolResult>;

    fn write_data(&mut self, data: Vec<u8>) -> Result<ProtocolResult>;
}

/// Protocol settings as they appear in the service config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolConfig {
    Burst {
        #[serde(default)]
        discard_leading_bytes: usize,
        /// Hex string such as `1ACFFC1D`
        #[serde(default)]
        sync_pattern: Option<String>,
        #[serde(default)]
        fill_fields: bool,
    },
    Length {
        #[serde(default)]
        length_bit_offset: i64,
        #[serde(default = "default_length_bit_size")]
        length_bit_size: i64,
        #[serde(default)]
        length_value_offset: i64,
        #[serde(default = "default_bytes_per_count")]
        length_bytes_per_count: i64,
        #[serde(default)]
        length_endianness: Endianness,
        #[serde(default)]
        discard_leading_bytes: usize,
        #[serde(default)]
        sync_pattern: Option<String>,
        #[serde(default)]
        max_length: Option<u64>,
        #[serde(default)]
        fill_fields: bool,
    },
}

fn default_length_bit_size() -> i64 {
    16
}

fn default_bytes_per_count() -> i64 {
    1
}

impl ProtocolConfig {
    pub fn build(&self) -> Result<Box<dyn Protocol>> {
        Ok(match self {
            ProtocolConfig::Burst {
                discard_leading_bytes,
                sync_pattern,
                fill_fields,
            } => Box::new(BurstProtocol::new(
                *discard_leading_bytes,
                parse_sync_pattern(sync_pattern.as_deref())?,
                *fill_fields,
            )),
            ProtocolConfig::Length {
                length_bit_offset,
                length_bit_size,
                length_value_offset,
                length_bytes_per_count,
                length_endianness,
                discard_leading_bytes,
                sync_pattern,
                max_length,
                fill_fields,
            } => Box::new(LengthProtocol::new(
                *length_bit_offset,
                *length_bit_size,
                *length_value_offset,
                *length_bytes_per_count,
                *length_endianness,
                BurstProtocol::new(
                    *discard_leading_bytes,
                    parse_sync_pattern(sync_pattern.as_deref())?,
                    *fill_fields,
                ),
                *max_length,
            )?),
        })
    }
}

/// Decode an optional `0x`-prefixed hex sync pattern
pub fn parse_sync_pattern(pattern: Option<&str>) -> Result<Option<Vec<u8>>> {
    let Some(pattern) = pattern.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let digits = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    if digits.len() % 2 != 0 {
        return Err(CmdTlmError::config(format!(
            "sync pattern must have an even number of hex digits: {}",
            pattern
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CmdTlmError::config(format!("invalid sync pattern: {}", pattern)))
        })
        .collect::<Result<Vec<u8>>>()
        .map(Some)
}
