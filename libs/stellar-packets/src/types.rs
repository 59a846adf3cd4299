//! Core enumerations shared by items, structures and packets

use crate::error::PacketError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Item data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Int,
    Uint,
    Float,
    String,
    Block,
    Derived,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Uint => "UINT",
            Self::Float => "FLOAT",
            Self::String => "STRING",
            Self::Block => "BLOCK",
            Self::Derived => "DERIVED",
        }
    }

    /// INT or UINT
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int | Self::Uint)
    }

    /// STRING or BLOCK
    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::String | Self::Block)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INT" => Ok(Self::Int),
            "UINT" => Ok(Self::Uint),
            "FLOAT" => Ok(Self::Float),
            "STRING" => Ok(Self::String),
            "BLOCK" => Ok(Self::Block),
            "DERIVED" => Ok(Self::Derived),
            _ => Err(PacketError::UnknownDataType(s.to_string())),
        }
    }
}

/// Byte order of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Endianness {
    #[default]
    BigEndian,
    LittleEndian,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BigEndian => f.write_str("BIG_ENDIAN"),
            Self::LittleEndian => f.write_str("LITTLE_ENDIAN"),
        }
    }
}

impl FromStr for Endianness {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BIG_ENDIAN" => Ok(Self::BigEndian),
            "LITTLE_ENDIAN" => Ok(Self::LittleEndian),
            _ => Err(PacketError::UnknownEndianness(s.to_string())),
        }
    }
}

/// Policy applied when a written value does not fit its bit size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Overflow {
    #[default]
    Error,
    ErrorAllowHex,
    Truncate,
    Saturate,
}

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "ERROR",
            Self::ErrorAllowHex => "ERROR_ALLOW_HEX",
            Self::Truncate => "TRUNCATE",
            Self::Saturate => "SATURATE",
        };
        f.write_str(s)
    }
}

impl FromStr for Overflow {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(Self::Error),
            "ERROR_ALLOW_HEX" => Ok(Self::ErrorAllowHex),
            "TRUNCATE" => Ok(Self::Truncate),
            "SATURATE" => Ok(Self::Saturate),
            _ => Err(PacketError::UnknownOverflow(s.to_string())),
        }
    }
}

/// Representation level used when reading or writing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Raw,
    #[default]
    Converted,
    Formatted,
    WithUnits,
}

impl ValueType {
    /// Parse a representation name, reporting `op` in the error
    ///
    /// Names outside RAW/CONVERTED/FORMATTED/WITH_UNITS are rejected with an
    /// "Unknown value type on {op}" error.
    pub fn parse_for(s: &str, op: &'static str) -> Result<Self, PacketError> {
        match s.to_uppercase().as_str() {
            "RAW" => Ok(Self::Raw),
            "CONVERTED" => Ok(Self::Converted),
            "FORMATTED" => Ok(Self::Formatted),
            "WITH_UNITS" => Ok(Self::WithUnits),
            _ => Err(PacketError::UnknownValueType {
                op,
                value_type: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Raw => "RAW",
            Self::Converted => "CONVERTED",
            Self::Formatted => "FORMATTED",
            Self::WithUnits => "WITH_UNITS",
        };
        f.write_str(s)
    }
}

impl FromStr for ValueType {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_for(s, "read")
    }
}
