#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

//! Command directives end to end
//!
//! - Command directives build, hazard-check and write through the link
//! - Sent commands land on the raw and decoded command topics
//! - Rule-engine commands round-trip through the handler thread and its ack
//! - Routers forward identified commands to the owning interface

mod common;

use cmdtlm::{
    BusCommandSender, ConnectionManager, ConnectionState, InterfaceDirective, InterfaceLink,
    RawPacket, SimInterface, SUCCESS,
};
use common::{context, info, wait_until};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stellar_bus::{MemoryBus, PacketMessage, TopicKeys};
use stellar_packets::{CommandParams, Value};
use stellar_rules::CommandSender;

const COLLECT_NORMAL: [u8; 6] = [4, 0, 0x3F, 0x80, 0, 0];

fn collect(params: serde_json::Value, hazardous_check: bool) -> InterfaceDirective {
    InterfaceDirective::Command {
        target_name: "inst".to_string(),
        cmd_name: "collect".to_string(),
        params: params.as_object().cloned().unwrap_or_default(),
        range_check: true,
        raw: false,
        hazardous_check,
    }
}

fn connected_interface(bus: Arc<MemoryBus>) -> (ConnectionManager, Arc<SimInterface>) {
    let sim = Arc::new(SimInterface::new(info("INST_INT"), false));
    let manager = ConnectionManager::interface(InterfaceLink::new(sim.clone()), context(bus));
    manager.run_once();
    assert_eq!(manager.state(), ConnectionState::Connected);
    (manager, sim)
}

// ============================================================================
// Command directives
// ============================================================================

#[test]
fn test_command_written_and_published() {
    let bus = Arc::new(MemoryBus::new());
    let (manager, sim) = connected_interface(bus.clone());

    let result = manager.handle_directive(collect(json!({"type": "NORMAL"}), true));
    assert_eq!(result, SUCCESS);
    assert_eq!(sim.written(), vec![COLLECT_NORMAL.to_vec()]);

    let raw = bus.messages("DEFAULT__COMMAND__INST__COLLECT");
    assert_eq!(raw.len(), 1);
    let raw: PacketMessage = raw[0].json().unwrap();
    assert_eq!(raw.buffer, COLLECT_NORMAL.to_vec());
    assert_eq!(raw.received_count, 1);

    let decoded = bus.messages("DEFAULT__DECOMCMD__INST__COLLECT");
    assert_eq!(decoded.len(), 1);
    let decoded: serde_json::Value = decoded[0].json().unwrap();
    assert_eq!(decoded["json_data"]["OPCODE"], 4);
    assert_eq!(decoded["json_data"]["TYPE__C"], "NORMAL");
    assert_eq!(decoded["received_count"], 1);

    manager.handle_directive(collect(json!({"type": "NORMAL"}), true));
    let second: PacketMessage = bus.messages("DEFAULT__COMMAND__INST__COLLECT")[1]
        .json()
        .unwrap();
    assert_eq!(second.received_count, 2);
}

#[test]
fn test_hazardous_command_is_held() {
    let bus = Arc::new(MemoryBus::new());
    let (manager, sim) = connected_interface(bus.clone());

    let result = manager.handle_directive(collect(json!({"type": "SPECIAL"}), true));
    assert_eq!(
        result,
        "HazardousError\nTYPE: Special collect\nINST COLLECT with TYPE 'SPECIAL'"
    );
    assert!(sim.written().is_empty());
    assert!(bus.messages("DEFAULT__COMMAND__INST__COLLECT").is_empty());

    let check = manager.handle_directive(InterfaceDirective::HazardousCheck {
        target_name: "INST".to_string(),
        cmd_name: "COLLECT".to_string(),
        params: json!({"TYPE": "NORMAL"}).as_object().cloned().unwrap(),
    });
    assert_eq!(check, SUCCESS);

    assert_eq!(
        manager.handle_directive(collect(json!({"type": "SPECIAL"}), false)),
        SUCCESS
    );
    assert_eq!(sim.written().len(), 1);
}

#[test]
fn test_command_errors_are_returned() {
    let bus = Arc::new(MemoryBus::new());
    let (manager, sim) = connected_interface(bus);

    let result = manager.handle_directive(collect(json!({"type": "NORMAL", "duration": 11.0}), true));
    assert_eq!(
        result,
        "Command parameter 'DURATION' = 11.0 not in valid range of 0.0 to 10.0"
    );

    manager.handle_directive(InterfaceDirective::Disconnect);
    let result = manager.handle_directive(collect(json!({"type": "NORMAL"}), true));
    assert_eq!(result, "Not connected: INST_INT");
    assert!(sim.written().is_empty());
}

#[test]
fn test_write_raw_and_command_buffer() {
    let bus = Arc::new(MemoryBus::new());
    let (manager, sim) = connected_interface(bus.clone());

    assert_eq!(
        manager.handle_directive(InterfaceDirective::WriteRaw { data: vec![0xAA, 0xBB] }),
        SUCCESS
    );
    assert_eq!(bus.messages("DEFAULT__COMMAND__UNKNOWN__UNKNOWN").len(), 1);

    assert_eq!(
        manager.handle_directive(InterfaceDirective::CommandBuffer {
            target_name: None,
            buffer: COLLECT_NORMAL.to_vec(),
        }),
        SUCCESS
    );
    assert_eq!(bus.messages("DEFAULT__COMMAND__INST__COLLECT").len(), 1);
    assert_eq!(sim.written(), vec![vec![0xAA, 0xBB], COLLECT_NORMAL.to_vec()]);
}

// ============================================================================
// Rule-engine commands through the handler thread
// ============================================================================

#[test]
fn test_bus_command_sender_round_trip() {
    let bus = Arc::new(MemoryBus::new());
    let (manager, sim) = connected_interface(bus.clone());
    manager.start().unwrap();

    let mut routes = BTreeMap::new();
    routes.insert("INST".to_string(), "INST_INT".to_string());
    let sender = BusCommandSender::new(TopicKeys::default(), bus.clone(), routes);

    let mut params = CommandParams::new();
    params.insert("TYPE".to_string(), Value::from("SPECIAL"));
    // rule-engine commands skip the hazardous check
    sender.send_command("INST", "COLLECT", &params).unwrap();
    assert_eq!(sim.written().len(), 1);

    params.insert("DURATION".to_string(), Value::Float(11.0));
    let err = sender.send_command("INST", "COLLECT", &params).unwrap_err();
    assert!(err.contains("not in valid range"));

    let err = sender.send_command("OTHER", "COLLECT", &params).unwrap_err();
    assert_eq!(err, "no interface for target OTHER");

    let started = Instant::now();
    manager.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(manager.is_cancelled());
}

#[test]
fn test_bus_command_sender_times_out() {
    let bus = Arc::new(MemoryBus::new());
    let mut routes = BTreeMap::new();
    routes.insert("INST".to_string(), "INST_INT".to_string());
    let sender = BusCommandSender::new(TopicKeys::default(), bus, routes)
        .with_timeout(Duration::from_millis(100));

    let err = sender
        .send_command("INST", "COLLECT", &CommandParams::new())
        .unwrap_err();
    assert!(err.starts_with("timeout waiting for INST_INT"));
}

// ============================================================================
// Routers
// ============================================================================

#[test]
fn test_router_forwards_identified_commands() {
    let bus = Arc::new(MemoryBus::new());
    let (interface, sim) = connected_interface(bus.clone());
    interface.start().unwrap();

    let router_sim = Arc::new(SimInterface::new(info("INST_ROUTER"), false));
    let mut routes = BTreeMap::new();
    routes.insert("INST".to_string(), "INST_INT".to_string());
    let router = ConnectionManager::router(
        InterfaceLink::new(router_sim.clone()),
        context(bus.clone()),
        routes,
    );
    router.run_once();
    assert_eq!(router.state(), ConnectionState::Connected);

    router_sim.inject(RawPacket::new(COLLECT_NORMAL.to_vec()));
    router.run_once();
    assert_eq!(bus.messages("DEFAULT__CMD__INTERFACE__INST_INT").len(), 1);

    // unidentified commands are dropped
    router_sim.inject(RawPacket::new(vec![0x77]));
    router.run_once();
    assert_eq!(bus.messages("DEFAULT__CMD__INTERFACE__INST_INT").len(), 1);

    assert!(wait_until(Duration::from_secs(3), || sim.written().len() == 1));
    assert_eq!(sim.written()[0], COLLECT_NORMAL.to_vec());
    assert_eq!(
        router.handle_directive(InterfaceDirective::WriteRaw { data: vec![1] }),
        "INST_ROUTER: router does not accept WriteRaw { data: [1] }"
    );
    interface.stop();
}
