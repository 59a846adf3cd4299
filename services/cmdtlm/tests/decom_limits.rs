#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

//! Decommutation and limits events
//!
//! - Live packets update the current-value table and publish decoded JSON
//! - Limits transitions publish one event per confirmed change
//! - Stored packets decode without touching the table or limits state
//! - The background thread follows the raw telemetry topics

mod common;

use cmdtlm::DecomPipeline;
use common::{dictionary, wait_until};
use std::sync::Arc;
use std::time::Duration;
use stellar_bus::{
    Bus, BusExt, FixedTimeProvider, LimitsEventMessage, MemoryBus, PacketMessage, TopicKeys,
};
use stellar_packets::{CurrentValueTable, Value, ValueType};

const LIMITS_TOPIC: &str = "DEFAULT__stellar_limits_events";

fn pipeline(bus: Arc<MemoryBus>) -> DecomPipeline {
    let dictionary = Arc::new(dictionary());
    let cvt = Arc::new(CurrentValueTable::from_dictionary(&dictionary));
    DecomPipeline::new(
        TopicKeys::default(),
        bus,
        dictionary,
        cvt,
        Arc::new(FixedTimeProvider::from_secs(100)),
    )
}

fn health_status(temp_raw: u16, count: u64, stored: bool) -> PacketMessage {
    let [hi, lo] = temp_raw.to_be_bytes();
    PacketMessage {
        target_name: "INST".to_string(),
        packet_name: "HEALTH_STATUS".to_string(),
        received_time: 1_000_000_000 * count as i64,
        received_count: count,
        stored,
        buffer: vec![1, hi, lo],
    }
}

fn limits_events(bus: &MemoryBus) -> Vec<LimitsEventMessage> {
    bus.messages(LIMITS_TOPIC)
        .iter()
        .map(|m| m.json().unwrap())
        .collect()
}

// ============================================================================
// Decoding and limits
// ============================================================================

#[test]
fn test_decoded_json_and_limits_transitions() {
    let bus = Arc::new(MemoryBus::new());
    let decom = pipeline(bus.clone());

    let json = decom.process(&health_status(200, 1, false)).unwrap();
    assert_eq!(json["target_name"], "INST");
    assert_eq!(json["received_count"], 1);
    assert_eq!(json["json_data"]["TEMP1"], 200);
    assert_eq!(json["json_data"]["TEMP1__C"], 100.0);
    assert_eq!(json["json_data"]["TEMP1__L"], "RED_HIGH");
    assert_eq!(bus.messages("DEFAULT__DECOM__INST__HEALTH_STATUS").len(), 1);

    let events = limits_events(&bus);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].item_name, "TEMP1");
    assert_eq!(events[0].old_limits_state, None);
    assert_eq!(events[0].new_limits_state.as_deref(), Some("RED_HIGH"));
    assert_eq!(events[0].time_nsec, 1_000_000_000);
    assert_eq!(
        events[0].message,
        "INST HEALTH_STATUS TEMP1 = 100.0 is RED_HIGH"
    );

    // same zone, no new event
    decom.process(&health_status(190, 2, false)).unwrap();
    assert_eq!(limits_events(&bus).len(), 1);

    decom.process(&health_status(100, 3, false)).unwrap();
    let events = limits_events(&bus);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].old_limits_state.as_deref(), Some("RED_HIGH"));
    assert_eq!(events[1].new_limits_state.as_deref(), Some("GREEN"));

    assert_eq!(
        decom
            .cvt()
            .read("INST", "HEALTH_STATUS", "TEMP1", ValueType::Converted)
            .unwrap(),
        Value::Float(50.0)
    );
}

#[test]
fn test_stored_packets_do_not_touch_current_values() {
    let bus = Arc::new(MemoryBus::new());
    let decom = pipeline(bus.clone());
    decom.process(&health_status(100, 1, false)).unwrap();
    let before = limits_events(&bus).len();

    let json = decom.process(&health_status(200, 2, true)).unwrap();
    assert_eq!(json["stored"], true);
    assert_eq!(json["json_data"]["TEMP1"], 200);

    assert_eq!(limits_events(&bus).len(), before);
    assert_eq!(
        decom
            .cvt()
            .read("INST", "HEALTH_STATUS", "TEMP1", ValueType::Raw)
            .unwrap(),
        Value::UInt(100)
    );
}

// ============================================================================
// Background thread
// ============================================================================

#[test]
fn test_thread_follows_raw_topics() {
    let bus = Arc::new(MemoryBus::new());
    let decom = Arc::new(pipeline(bus.clone()));
    assert!(decom
        .topics()
        .contains(&"DEFAULT__TELEMETRY__UNKNOWN__UNKNOWN".to_string()));
    decom.start().unwrap();

    bus.publish_json(
        "DEFAULT__TELEMETRY__INST__HEALTH_STATUS",
        &health_status(10, 1, false),
    )
    .unwrap();
    bus.publish("DEFAULT__TELEMETRY__INST__HEALTH_STATUS", b"not json".to_vec().into())
        .unwrap();
    bus.publish_json(
        "DEFAULT__TELEMETRY__INST__HEALTH_STATUS",
        &health_status(20, 2, false),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        bus.messages("DEFAULT__DECOM__INST__HEALTH_STATUS").len() == 2
    }));
    decom.stop();
}
