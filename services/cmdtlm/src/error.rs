//! Error handling for the command and telemetry service

use errors::StellarError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmdTlmError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Socket and file errors, classified by kind in the reader loop
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Interface has no open connection
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Operation gave up waiting
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Connect attempt abandoned by a stop request
    #[error("Connect canceled: {0}")]
    Canceled(String),

    /// Framing errors raised by the protocol chain
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Packet definition or buffer errors
    #[error(transparent)]
    Packet(#[from] stellar_packets::PacketError),

    /// Message bus errors
    #[error(transparent)]
    Bus(#[from] stellar_bus::BusError),

    /// Rule engine errors
    #[error(transparent)]
    Rule(#[from] stellar_rules::RuleError),

    /// Directive could not be honored
    #[error("Interface error: {0}")]
    InterfaceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, CmdTlmError>;

impl CmdTlmError {
    pub fn config(msg: impl Into<String>) -> Self {
        CmdTlmError::ConfigError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        CmdTlmError::ProtocolError(msg.into())
    }

    pub fn interface(msg: impl Into<String>) -> Self {
        CmdTlmError::InterfaceError(msg.into())
    }

    /// Underlying I/O error kind, if any
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            CmdTlmError::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CmdTlmError {
    fn from(err: serde_json::Error) -> Self {
        CmdTlmError::SerializationError(err.to_string())
    }
}

impl From<CmdTlmError> for StellarError {
    fn from(err: CmdTlmError) -> Self {
        match err {
            CmdTlmError::ConfigError(msg) => StellarError::Config(msg),
            CmdTlmError::Io(e) => StellarError::Io(e.to_string()),
            CmdTlmError::NotConnected(endpoint) => StellarError::ConnectionLost {
                endpoint,
                reason: "not connected".to_string(),
            },
            CmdTlmError::TimeoutError(msg) => StellarError::Timeout(msg),
            CmdTlmError::Canceled(endpoint) => StellarError::ConnectionFailed {
                endpoint,
                reason: "canceled".to_string(),
            },
            CmdTlmError::ProtocolError(msg) => StellarError::Decode(msg),
            CmdTlmError::Packet(e) => e.into(),
            CmdTlmError::Bus(e) => e.into(),
            CmdTlmError::Rule(e) => e.into(),
            CmdTlmError::InterfaceError(msg) | CmdTlmError::InternalError(msg) => {
                StellarError::Internal(msg)
            },
            CmdTlmError::SerializationError(msg) => StellarError::Serialization(msg),
        }
    }
}
