//! Error types for stellar-packets

use thiserror::Error;

/// Packet model errors
///
/// The first group are configuration errors raised while a dictionary is
/// built; they never occur at runtime against a validated dictionary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacketError {
    // ========== Configuration ==========
    #[error("{0}")]
    InvalidItem(String),

    #[error("data_type {0} is not recognized")]
    UnknownDataType(String),

    #[error("Unrecognized endianness: {0} - Must be BIG_ENDIAN or LITTLE_ENDIAN")]
    UnknownEndianness(String),

    #[error("Unknown overflow type {0}")]
    UnknownOverflow(String),

    #[error("Can't append an item after a variably sized item")]
    AppendAfterVariable,

    // ========== Bit access ==========
    #[error("{0}")]
    Access(String),

    #[error("{length} byte buffer insufficient to {op} {data_type} at bit_offset {bit_offset} with bit_size {bit_size}")]
    BufferInsufficient {
        op: &'static str,
        length: usize,
        data_type: String,
        bit_offset: i64,
        bit_size: i64,
    },

    #[error("value of {value} invalid for {bit_size}-bit {data_type}")]
    Overflow {
        value: String,
        bit_size: i64,
        data_type: String,
    },

    // ========== Packet operations ==========
    #[error("Packet item '{target} {packet} {item}' does not exist")]
    ItemNotFound {
        target: String,
        packet: String,
        item: String,
    },

    #[error("Unknown value type on {op}: {value_type}")]
    UnknownValueType { op: &'static str, value_type: String },

    #[error("Invalid value type on write: {0}")]
    InvalidWriteType(String),

    #[error("Cannot write DERIVED item {0} without a write conversion")]
    DerivedWrite(String),

    #[error("Unknown state {state} for {item}")]
    UnknownState { state: String, item: String },

    #[error("Unknown limits state {0}")]
    UnknownLimitsState(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Buffer length {actual} does not match defined length {defined}")]
    BufferLength { actual: usize, defined: usize },

    // ========== Dictionary ==========
    #[error("Unknown target {0}")]
    TargetNotFound(String),

    #[error("Packet '{target} {packet}' does not exist")]
    PacketNotFound { target: String, packet: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Missing required parameter: {target} {packet} {item}")]
    MissingParameter {
        target: String,
        packet: String,
        item: String,
    },
}

pub type Result<T> = std::result::Result<T, PacketError>;

impl PacketError {
    /// True for errors produced while validating dictionary definitions
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidItem(_)
                | Self::UnknownDataType(_)
                | Self::UnknownEndianness(_)
                | Self::UnknownOverflow(_)
                | Self::AppendAfterVariable
        )
    }
}

impl From<std::io::Error> for PacketError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PacketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PacketError> for errors::StellarError {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::PacketNotFound { .. }
            | PacketError::ItemNotFound { .. }
            | PacketError::TargetNotFound(_) => Self::NotFound(err.to_string()),
            PacketError::UnknownValueType { .. } => Self::UnknownType(err.to_string()),
            PacketError::Io(msg) => Self::Io(msg),
            PacketError::Serialization(msg) => Self::Serialization(msg),
            err if err.is_configuration() => Self::Config(err.to_string()),
            err => Self::Decode(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_buffer_insufficient_message() {
        let err = PacketError::BufferInsufficient {
            op: "read",
            length: 16,
            data_type: "STRING".to_string(),
            bit_offset: 8,
            bit_size: 800,
        };
        assert_eq!(
            err.to_string(),
            "16 byte buffer insufficient to read STRING at bit_offset 8 with bit_size 800"
        );
    }

    #[test]
    fn test_item_not_found_message() {
        let err = PacketError::ItemNotFound {
            target: "INST".to_string(),
            packet: "HEALTH_STATUS".to_string(),
            item: "NOPE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Packet item 'INST HEALTH_STATUS NOPE' does not exist"
        );
    }

    #[test]
    fn test_configuration_classification() {
        assert!(PacketError::AppendAfterVariable.is_configuration());
        assert!(!PacketError::InvalidWriteType("FORMATTED".into()).is_configuration());
    }

    #[test]
    fn test_into_stellar_error() {
        let err: errors::StellarError = PacketError::TargetNotFound("INST".into()).into();
        assert!(matches!(err, errors::StellarError::NotFound(_)));
        let err: errors::StellarError = PacketError::AppendAfterVariable.into();
        assert!(matches!(err, errors::StellarError::Config(_)));
        let err: errors::StellarError = PacketError::Access("short".into()).into();
        assert!(matches!(err, errors::StellarError::Decode(_)));
    }
}
