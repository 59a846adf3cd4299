//! Interface abstraction
//!
//! An interface owns one physical or simulated connection. All methods take
//! `&self` so the reader thread can block in [`Interface::read_interface`]
//! while the command handler writes; implementations synchronize internally.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reader loop state; `Disconnected` waits for an external connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Attempting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Attempting => "ATTEMPTING",
            ConnectionState::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes read from an interface, optionally already identified
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPacket {
    pub buffer: Vec<u8>,
    pub target_name: Option<String>,
    pub packet_name: Option<String>,
    pub received_time: Option<DateTime<Utc>>,
    /// Replayed from storage rather than received live
    pub stored: bool,
}

impl RawPacket {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            ..Default::default()
        }
    }

    pub fn identified(mut self, target: &str, packet: &str) -> Self {
        self.target_name = Some(target.to_string());
        self.packet_name = Some(packet.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Data(RawPacket),
    /// Peer closed the connection
    NoData,
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> f64 {
    5.0
}

/// Static description of an interface or router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(default)]
    pub target_names: Vec<String>,
    #[serde(default = "default_true")]
    pub connect_on_startup: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Seconds between reconnect attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: f64,
    #[serde(default = "default_true")]
    pub read_allowed: bool,
    #[serde(default = "default_true")]
    pub write_allowed: bool,
    #[serde(default = "default_true")]
    pub write_raw_allowed: bool,
    #[serde(default)]
    pub plugin: Option<String>,
}

impl InterfaceInfo {
    pub fn new(name: &str, target_names: &[&str]) -> Self {
        Self {
            name: name.to_uppercase(),
            target_names: target_names.iter().map(|t| t.to_uppercase()).collect(),
            connect_on_startup: true,
            auto_reconnect: true,
            reconnect_delay: default_reconnect_delay(),
            read_allowed: true,
            write_allowed: true,
            write_raw_allowed: true,
            plugin: None,
        }
    }
}

/// Live counters, shared between the reader and the handler
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub read_count: AtomicU64,
    pub write_count: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub num_clients: AtomicU64,
    pub read_queue_size: AtomicU64,
    pub write_queue_size: AtomicU64,
}

impl InterfaceStats {
    pub fn record_write(&self, bytes: usize) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

pub trait Interface: Send + Sync {
    fn info(&self) -> &InterfaceInfo;

    fn stats(&self) -> &InterfaceStats;

    fn connect(&self) -> Result<()>;

    fn connected(&self) -> bool;

    /// Close the connection; must unblock a pending `read_interface`
    fn disconnect(&self);

    /// One blocking read of whatever the transport delivers
    fn read_interface(&self) -> Result<ReadResult>;

    fn write_interface(&self, data: &[u8]) -> Result<()>;
}
