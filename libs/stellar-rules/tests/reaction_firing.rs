#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

//! End-to-end reaction firing through the running engine
//!
//! - Decom messages on the bus drive trigger evaluation
//! - A reaction fires once per rising edge and then snoozes
//! - Snoozed reactions do not fire again on later edges

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stellar_bus::{Bus, BusExt, MemoryBus, MemoryStatusStore, StatusStore, SystemTimeProvider, TopicKeys};
use stellar_packets::{CommandParams, ValueType};
use stellar_rules::{
    Action, CommandSender, EngineDeps, Notification, Operand, Operator, ReactionDefinition,
    ReactionEvent, RuleEngine, RuleEngineConfig, ScriptRunner, TriggerDefinition, TriggerRef,
};

const DECOM_TOPIC: &str = "DEFAULT__DECOM__INST__HEALTH_STATUS";

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String, CommandParams)>>,
}

impl CommandSender for RecordingSender {
    fn send_command(
        &self,
        target: &str,
        packet: &str,
        params: &CommandParams,
    ) -> Result<(), String> {
        self.sent
            .lock()
            .push((target.to_string(), packet.to_string(), params.clone()));
        Ok(())
    }
}

struct NoScripts;

impl ScriptRunner for NoScripts {
    fn run_script(
        &self,
        name: &str,
        _environment: &serde_json::Value,
        _reaction: &str,
        _now_secs: i64,
    ) -> Result<(), String> {
        Err(format!("no script runner for {}", name))
    }
}

fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    f()
}

fn publish_temp(bus: &MemoryBus, temp: f64) {
    bus.publish_json(
        DECOM_TOPIC,
        &json!({
            "target_name": "INST",
            "packet_name": "HEALTH_STATUS",
            "received_time": 0,
            "received_count": 1,
            "stored": false,
            "json_data": {"TEMP1": 0, "TEMP1__C": temp}
        }),
    )
    .unwrap();
}

struct Harness {
    engine: RuleEngine,
    bus: Arc<MemoryBus>,
    status: Arc<MemoryStatusStore>,
    sender: Arc<RecordingSender>,
}

fn start() -> Harness {
    let bus = Arc::new(MemoryBus::new());
    let status = Arc::new(MemoryStatusStore::new());
    let sender = Arc::new(RecordingSender::default());
    let engine = RuleEngine::new(
        TopicKeys::default(),
        RuleEngineConfig::default(),
        EngineDeps {
            bus: bus.clone(),
            status: status.clone(),
            commands: sender.clone(),
            scripts: Arc::new(NoScripts),
            clock: Arc::new(SystemTimeProvider),
        },
    );
    engine.start().unwrap();

    engine
        .create_trigger(&TriggerDefinition {
            name: "TEMP_HIGH".to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Item {
                target: "INST".to_string(),
                packet: "HEALTH_STATUS".to_string(),
                item: "TEMP1".to_string(),
                value_type: ValueType::Converted,
            },
            operator: Operator::Greater,
            right: Operand::Float { float: 50.0 },
        })
        .unwrap();
    engine
        .create_reaction(&ReactionDefinition {
            name: "ABORT_ON_HOT".to_string(),
            description: "abort collection when hot".to_string(),
            snooze: 30,
            triggers: vec![TriggerRef {
                name: "TEMP_HIGH".to_string(),
                group: "DEFAULT".to_string(),
            }],
            actions: vec![Action::Command {
                target: "INST".to_string(),
                packet: "ABORT".to_string(),
                params: Default::default(),
            }],
            review: true,
        })
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        engine.subscribed_topics().iter().any(|t| t == DECOM_TOPIC)
    }));
    Harness {
        engine,
        bus,
        status,
        sender,
    }
}

// ============================================================================
// Firing
// ============================================================================

#[test]
fn test_reaction_fires_once_then_snoozes() {
    let h = start();

    publish_temp(&h.bus, 60.0);
    assert!(wait_for(Duration::from_secs(5), || h.sender.sent.lock().len() == 1));
    {
        let sent = h.sender.sent.lock();
        assert_eq!(sent[0].0, "INST");
        assert_eq!(sent[0].1, "ABORT");
    }
    assert!(wait_for(Duration::from_secs(2), || {
        h.engine.trigger("TEMP_HIGH").unwrap().state
    }));
    assert!(h
        .engine
        .reaction("ABORT_ON_HOT")
        .unwrap()
        .snoozed_until
        .is_some());

    // still above: no new edge
    publish_temp(&h.bus, 70.0);
    // new edge while snoozed
    publish_temp(&h.bus, 40.0);
    publish_temp(&h.bus, 65.0);
    thread::sleep(Duration::from_millis(700));
    assert_eq!(h.sender.sent.lock().len(), 1);

    let history = h.engine.reaction_history("ABORT_ON_HOT");
    assert_eq!(history.len(), 1);
    assert!(history[0].success());

    let runs: Vec<Notification> = h
        .bus
        .messages("DEFAULT__stellar_reaction_events")
        .iter()
        .map(|m| m.json().unwrap())
        .collect();
    assert_eq!(
        runs.iter()
            .filter(|n| matches!(n, Notification::Reaction(ReactionEvent::Run(_))))
            .count(),
        1
    );

    h.engine.stop();
}

#[test]
fn test_below_threshold_never_fires() {
    let h = start();
    publish_temp(&h.bus, 10.0);
    publish_temp(&h.bus, 50.0);
    thread::sleep(Duration::from_millis(700));
    assert!(h.sender.sent.lock().is_empty());
    assert!(!h.engine.trigger("TEMP_HIGH").unwrap().state);
    h.engine.stop();
}

#[test]
fn test_status_written_by_sweep() {
    let h = start();
    assert!(wait_for(Duration::from_secs(3), || {
        h.status
            .hash_get("DEFAULT__rules_status", "RULE_ENGINE")
            .unwrap()
            .is_some()
    }));
    let raw = h
        .status
        .hash_get("DEFAULT__rules_status", "RULE_ENGINE")
        .unwrap()
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(status["triggers"], 1);
    assert_eq!(status["reactions"], 1);
    h.engine.stop();
}

#[test]
fn test_stop_joins_when_bus_closed() {
    let h = start();
    h.bus.close();
    h.engine.stop();
    assert!(h.engine.subscribed_topics().iter().any(|t| t == DECOM_TOPIC));
}
