//! Payloads carried on the packet and limits topics

use serde::{Deserialize, Serialize};

/// Raw packet as it travels on `telemetry-raw` / `command-raw`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMessage {
    pub target_name: String,
    pub packet_name: String,
    /// Nanoseconds since Unix epoch
    pub received_time: i64,
    #[serde(default)]
    pub received_count: u64,
    #[serde(default)]
    pub stored: bool,
    pub buffer: Vec<u8>,
}

/// Confirmed limits state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsEventMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub target_name: String,
    pub packet_name: String,
    pub item_name: String,
    pub old_limits_state: Option<String>,
    pub new_limits_state: Option<String>,
    pub time_nsec: i64,
    pub message: String,
}

impl LimitsEventMessage {
    pub const LIMITS_CHANGE: &'static str = "LIMITS_CHANGE";

    pub fn change(
        target_name: &str,
        packet_name: &str,
        item_name: &str,
        old_limits_state: Option<String>,
        new_limits_state: Option<String>,
        time_nsec: i64,
        message: String,
    ) -> Self {
        Self {
            event_type: Self::LIMITS_CHANGE.to_string(),
            target_name: target_name.to_string(),
            packet_name: packet_name.to_string(),
            item_name: item_name.to_string(),
            old_limits_state,
            new_limits_state,
            time_nsec,
            message,
        }
    }
}
