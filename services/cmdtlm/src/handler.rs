//! Directive side channel for interfaces and routers
//!
//! Directives arrive on `{scope}__CMD__INTERFACE__{name}` (or the router
//! equivalent) wrapped in a [`DirectiveEnvelope`]; every directive is answered
//! on the matching ack topic with `SUCCESS` or an error message. Routers also
//! forward telemetry of their targets out through the link.

use crate::error::Result;
use crate::interface::ConnectionState;
use crate::manager::{ManagerContext, ManagerCore, Role, UNKNOWN};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stellar_bus::{Bus, BusError, BusExt, Message, PacketMessage, Subscription, TopicKeys};
use stellar_packets::{CommandParams, Endianness, Packet, Value};
use stellar_rules::CommandSender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const SUCCESS: &str = "SUCCESS";
const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterfaceDirective {
    Shutdown,
    Connect,
    Disconnect,
    WriteRaw {
        data: Vec<u8>,
    },
    StartRawLogging,
    StopRawLogging,
    Command {
        target_name: String,
        cmd_name: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
        #[serde(default = "default_true")]
        range_check: bool,
        #[serde(default)]
        raw: bool,
        #[serde(default = "default_true")]
        hazardous_check: bool,
    },
    CommandBuffer {
        #[serde(default)]
        target_name: Option<String>,
        buffer: Vec<u8>,
    },
    HazardousCheck {
        target_name: String,
        cmd_name: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveEnvelope {
    pub id: String,
    pub directive: InterfaceDirective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveAck {
    pub id: String,
    pub result: String,
}

/// Fire-and-forget directive to an interface
pub(crate) fn publish_directive(
    ctx: &ManagerContext,
    interface: &str,
    directive: InterfaceDirective,
) -> Result<String> {
    let envelope = DirectiveEnvelope {
        id: Uuid::new_v4().to_string(),
        directive,
    };
    ctx.bus
        .publish_json(&ctx.keys.interface_cmd(interface), &envelope)?;
    Ok(envelope.id)
}

fn to_params(params: &serde_json::Map<String, serde_json::Value>) -> CommandParams {
    params
        .iter()
        .map(|(k, v)| (k.to_uppercase(), Value::from_json(v)))
        .collect()
}

/// `TARGET PACKET with NAME value, ...`
pub fn format_command(target: &str, packet: &str, params: &CommandParams) -> String {
    if params.is_empty() {
        return format!("{} {}", target, packet);
    }
    let args: Vec<String> = params
        .iter()
        .map(|(name, value)| match value {
            Value::String(s) => format!("{} '{}'", name, s),
            other => format!("{} {}", name, other),
        })
        .collect();
    format!("{} {} with {}", target, packet, args.join(", "))
}

fn hazardous_error(description: &str, formatted: &str) -> String {
    format!("HazardousError\n{}\n{}", description, formatted)
}

// ============================================================================
// Interface directives
// ============================================================================

pub(crate) fn handle_interface_directive(core: &ManagerCore, directive: InterfaceDirective) -> String {
    let name = core.name().to_string();
    match directive {
        InterfaceDirective::Shutdown => {
            info!("{}: Shutdown requested", name);
            core.stop();
            SUCCESS.to_string()
        },
        InterfaceDirective::Connect => {
            info!("{}: Connect requested", name);
            if core.state() != ConnectionState::Connected {
                core.attempting();
            }
            SUCCESS.to_string()
        },
        InterfaceDirective::Disconnect => {
            info!("{}: Disconnect requested", name);
            core.disconnect(false);
            SUCCESS.to_string()
        },
        InterfaceDirective::WriteRaw { data } => {
            info!("{}: Write raw", name);
            let mut command = Packet::new(UNKNOWN, UNKNOWN, Endianness::BigEndian);
            command.set_buffer(data.clone());
            match core.link.write_raw(&data) {
                Ok(()) => {
                    publish_command(core, &command, false);
                    SUCCESS.to_string()
                },
                Err(e) => {
                    error!("{}: {}", name, e);
                    e.to_string()
                },
            }
        },
        InterfaceDirective::StartRawLogging => {
            info!("{}: Enable raw logging", name);
            match core.link.start_raw_logging() {
                Ok(()) => SUCCESS.to_string(),
                Err(e) => e.to_string(),
            }
        },
        InterfaceDirective::StopRawLogging => {
            info!("{}: Disable raw logging", name);
            core.link.stop_raw_logging();
            SUCCESS.to_string()
        },
        InterfaceDirective::Command {
            target_name,
            cmd_name,
            params,
            range_check,
            raw,
            hazardous_check,
        } => {
            let params = to_params(&params);
            let command = match core
                .ctx
                .dictionary
                .build_cmd(&target_name, &cmd_name, &params, range_check, raw)
            {
                Ok(command) => command,
                Err(e) => {
                    error!("{}: {} {}: {}", name, target_name, cmd_name, e);
                    return e.to_string();
                },
            };
            if hazardous_check {
                if let Some(description) = command.hazardous_reason() {
                    return hazardous_error(
                        &description,
                        &format_command(&target_name.to_uppercase(), &cmd_name.to_uppercase(), &params),
                    );
                }
            }
            write_command(core, command)
        },
        InterfaceDirective::CommandBuffer {
            target_name,
            buffer,
        } => {
            let targets = match target_name {
                Some(target) => vec![target.to_uppercase()],
                None => core.targets.clone(),
            };
            let mut command = match core.ctx.dictionary.identify_cmd(&buffer, &targets) {
                Some(template) => template.clone(),
                None => Packet::new(UNKNOWN, UNKNOWN, Endianness::BigEndian),
            };
            command.set_buffer(buffer);
            write_command(core, command)
        },
        InterfaceDirective::HazardousCheck {
            target_name,
            cmd_name,
            params,
        } => {
            let params = to_params(&params);
            match core
                .ctx
                .dictionary
                .build_cmd(&target_name, &cmd_name, &params, true, false)
            {
                Ok(command) => match command.hazardous_reason() {
                    Some(description) => hazardous_error(
                        &description,
                        &format_command(&target_name.to_uppercase(), &cmd_name.to_uppercase(), &params),
                    ),
                    None => SUCCESS.to_string(),
                },
                Err(e) => e.to_string(),
            }
        },
    }
}

fn write_command(core: &ManagerCore, command: Packet) -> String {
    match core.link.write(command.buffer().to_vec()) {
        Ok(()) => {
            publish_command(core, &command, true);
            core.write_status();
            SUCCESS.to_string()
        },
        Err(e) => {
            error!("{}: {}", core.name(), e);
            e.to_string()
        },
    }
}

/// Record a sent command on the raw and (optionally) decoded command topics
fn publish_command(core: &ManagerCore, command: &Packet, decoded: bool) {
    let target = command.target_name().unwrap_or(UNKNOWN).to_string();
    let packet = command.packet_name().unwrap_or(UNKNOWN).to_string();
    let now = core.ctx.clock.now_nanos();
    let count = core.next_cmd_count(&target, &packet);
    let message = PacketMessage {
        target_name: target.clone(),
        packet_name: packet.clone(),
        received_time: now,
        received_count: count,
        stored: false,
        buffer: command.buffer().to_vec(),
    };
    let keys = &core.ctx.keys;
    if let Err(e) = core
        .ctx
        .bus
        .publish_json(&keys.command_raw(&target, &packet), &message)
    {
        warn!("{}: unable to publish command: {}", core.name(), e);
    }
    if decoded {
        let mut json = command.as_decom_json();
        json["received_time"] = serde_json::json!(now);
        json["received_count"] = serde_json::json!(count);
        if let Err(e) = core
            .ctx
            .bus
            .publish_json(&keys.command_decoded(&target, &packet), &json)
        {
            warn!("{}: unable to publish decoded command: {}", core.name(), e);
        }
    }
}

// ============================================================================
// Router directives and telemetry forwarding
// ============================================================================

pub(crate) fn handle_router_directive(core: &ManagerCore, directive: InterfaceDirective) -> String {
    let name = core.name().to_string();
    match directive {
        InterfaceDirective::Shutdown => {
            info!("{}: Shutdown requested", name);
            core.stop();
        },
        InterfaceDirective::Connect => {
            info!("{}: Connect requested", name);
            if core.state() != ConnectionState::Connected {
                core.attempting();
            }
        },
        InterfaceDirective::Disconnect => {
            info!("{}: Disconnect requested", name);
            core.disconnect(false);
        },
        InterfaceDirective::StartRawLogging => {
            info!("{}: Enable raw logging", name);
            if let Err(e) = core.link.start_raw_logging() {
                return e.to_string();
            }
        },
        InterfaceDirective::StopRawLogging => {
            info!("{}: Disable raw logging", name);
            core.link.stop_raw_logging();
        },
        other => {
            return format!("{}: router does not accept {:?}", name, other);
        },
    }
    SUCCESS.to_string()
}

fn forward_telemetry(core: &ManagerCore, message: &Message) {
    if !core.link.connected() {
        return;
    }
    let packet: PacketMessage = match message.json() {
        Ok(p) => p,
        Err(e) => {
            warn!("{}: bad telemetry on {}: {}", core.name(), message.topic, e);
            return;
        },
    };
    match core.link.write(packet.buffer) {
        Ok(()) => core.write_status(),
        Err(e) => error!("{}: {}", core.name(), e),
    }
}

// ============================================================================
// Handler thread
// ============================================================================

pub(crate) fn handler_topics(core: &ManagerCore) -> Vec<String> {
    let keys = &core.ctx.keys;
    let mut topics = vec![core.role.cmd_topic(keys, core.name())];
    if core.role == Role::Router {
        for target in &core.targets {
            if let Ok(packets) = core.ctx.dictionary.telemetry_packets(target) {
                for packet in packets {
                    if let (Some(t), Some(p)) = (packet.target_name(), packet.packet_name()) {
                        topics.push(keys.telemetry_raw(t, p));
                    }
                }
            }
        }
    }
    topics
}

fn handle_message(core: &ManagerCore, cmd_topic: &str, message: &Message) {
    if message.topic != cmd_topic {
        forward_telemetry(core, message);
        return;
    }
    let envelope: DirectiveEnvelope = match message.json() {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("{}: invalid directive: {}", core.name(), e);
            return;
        },
    };
    debug!("{}: directive {} {:?}", core.name(), envelope.id, envelope.directive);
    let result = match core.role {
        Role::Interface => handle_interface_directive(core, envelope.directive),
        Role::Router => handle_router_directive(core, envelope.directive),
    };
    let ack = DirectiveAck {
        id: envelope.id,
        result,
    };
    let ack_topic = core.role.ack_topic(&core.ctx.keys, core.name());
    if let Err(e) = core.ctx.bus.publish_json(&ack_topic, &ack) {
        warn!("{}: unable to acknowledge {}: {}", core.name(), ack.id, e);
    }
}

pub(crate) fn run_handler(core: Arc<ManagerCore>, mut subscription: Subscription) {
    let cmd_topic = core.role.cmd_topic(&core.ctx.keys, core.name());
    while !core.cancel.is_cancelled() {
        let messages = match subscription.poll(POLL_TIMEOUT) {
            Ok(messages) => messages,
            Err(BusError::Closed) => break,
            Err(e) => {
                warn!("{}: handler poll failed: {}", core.name(), e);
                continue;
            },
        };
        for message in &messages {
            handle_message(&core, &cmd_topic, message);
            if core.cancel.is_cancelled() {
                break;
            }
        }
    }
    debug!("{}: handler stopped", core.name());
}

// ============================================================================
// Commands from the rule engine
// ============================================================================

/// Sends rule-engine commands through the owning interface and waits for its ack
pub struct BusCommandSender {
    keys: TopicKeys,
    bus: Arc<dyn Bus>,
    /// Target -> interface
    routes: std::collections::BTreeMap<String, String>,
    timeout: Duration,
}

impl BusCommandSender {
    pub fn new(
        keys: TopicKeys,
        bus: Arc<dyn Bus>,
        routes: std::collections::BTreeMap<String, String>,
    ) -> Self {
        Self {
            keys,
            bus,
            routes: routes
                .into_iter()
                .map(|(t, i)| (t.to_uppercase(), i.to_uppercase()))
                .collect(),
            timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandSender for BusCommandSender {
    fn send_command(
        &self,
        target: &str,
        packet: &str,
        params: &CommandParams,
    ) -> std::result::Result<(), String> {
        let target = target.to_uppercase();
        let interface = self
            .routes
            .get(&target)
            .ok_or_else(|| format!("no interface for target {}", target))?;
        let envelope = DirectiveEnvelope {
            id: Uuid::new_v4().to_string(),
            directive: InterfaceDirective::Command {
                target_name: target.clone(),
                cmd_name: packet.to_uppercase(),
                params: params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
                range_check: true,
                raw: false,
                hazardous_check: false,
            },
        };

        let mut acks = Subscription::latest(self.bus.clone(), &[self.keys.interface_ack(interface)]);
        self.bus
            .publish_json(&self.keys.interface_cmd(interface), &envelope)
            .map_err(|e| e.to_string())?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(format!("timeout waiting for {} to acknowledge {}", interface, packet));
            }
            let messages = acks.poll(remaining).map_err(|e| e.to_string())?;
            for message in messages {
                let Ok(ack) = message.json::<DirectiveAck>() else {
                    continue;
                };
                if ack.id == envelope.id {
                    return if ack.result == SUCCESS {
                        Ok(())
                    } else {
                        Err(ack.result)
                    };
                }
            }
        }
    }
}
