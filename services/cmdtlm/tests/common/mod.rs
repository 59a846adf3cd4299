//! Shared fixtures for cmdtlm integration tests

#![allow(dead_code, clippy::disallowed_methods)] // Test code - unwrap is acceptable

use cmdtlm::diagnostics::Diagnostics;
use cmdtlm::{InterfaceInfo, ManagerContext};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stellar_bus::{MemoryBus, MemoryStatusStore, SystemTimeProvider, TopicKeys};
use stellar_packets::Dictionary;

/// INST with one telemetry packet (limits on TEMP1) and one command
pub fn dictionary() -> Dictionary {
    let definition = json!({
        "telemetry": [
            {
                "target": "INST",
                "packet": "HEALTH_STATUS",
                "items": [
                    { "name": "PKTID", "bit_size": 8, "data_type": "UINT", "id_value": 1 },
                    { "name": "TEMP1", "bit_size": 16, "data_type": "UINT",
                      "read_conversion": { "type": "polynomial", "coeffs": [0.0, 0.5] },
                      "limits": { "values": { "DEFAULT": [1.0, 2.0, 80.0, 90.0] } } }
                ]
            }
        ],
        "commands": [
            {
                "target": "INST",
                "packet": "COLLECT",
                "items": [
                    { "name": "OPCODE", "bit_size": 8, "data_type": "UINT", "id_value": 4, "default": 4 },
                    { "name": "TYPE", "bit_size": 8, "data_type": "UINT", "required": true,
                      "states": [ { "name": "NORMAL", "value": 0 },
                                  { "name": "SPECIAL", "value": 1, "hazardous": "Special collect" } ] },
                    { "name": "DURATION", "bit_size": 32, "data_type": "FLOAT", "default": 1.0,
                      "minimum": 0.0, "maximum": 10.0 }
                ]
            }
        ]
    });
    Dictionary::from_json(&definition.to_string()).unwrap()
}

pub fn info(name: &str) -> InterfaceInfo {
    let mut info = InterfaceInfo::new(name, &["INST"]);
    info.reconnect_delay = 0.0;
    info
}

pub fn context(bus: Arc<MemoryBus>) -> ManagerContext {
    ManagerContext {
        keys: TopicKeys::default(),
        bus,
        status: Arc::new(MemoryStatusStore::new()),
        dictionary: Arc::new(dictionary()),
        clock: Arc::new(SystemTimeProvider),
        diagnostics: Arc::new(Diagnostics::default()),
    }
}

/// Poll `check` every 10 ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
