//! Decommutation: raw packets in, decoded JSON and limits events out
//!
//! Each raw packet updates a live copy of its current-value entry, runs
//! limits checking and publishes `as_decom_json` to the `DECOM` topic.
//! Stored (replayed) packets are decoded on a detached copy and never touch
//! the table or the limits state.

use crate::error::Result;
use crate::manager::UNKNOWN;
use chrono::{DateTime, TimeZone, Utc};
use common::CancelSignal;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stellar_bus::{
    Bus, BusError, BusExt, LimitsEventMessage, Message, PacketMessage, Subscription, TimeProvider,
    TopicKeys,
};
use stellar_packets::{
    CurrentValueTable, Dictionary, Endianness, LimitsCallback, LimitsState, Packet, PacketItem,
    Value,
};
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Publishes confirmed limits changes to the limits-events topic
pub struct LimitsPublisher {
    topic: String,
    bus: Arc<dyn Bus>,
    clock: Arc<dyn TimeProvider>,
}

impl LimitsPublisher {
    pub fn new(keys: &TopicKeys, bus: Arc<dyn Bus>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            topic: keys.limits_events(),
            bus,
            clock,
        }
    }
}

impl LimitsCallback for LimitsPublisher {
    fn limits_change(
        &self,
        packet: &Packet,
        item: &PacketItem,
        old_state: Option<LimitsState>,
        value: &Value,
        should_log: bool,
    ) {
        let target = packet.target_name().unwrap_or(UNKNOWN);
        let name = packet.packet_name().unwrap_or(UNKNOWN);
        let new_state = item.limits.state();
        let message = match (value, new_state) {
            (Value::Null, _) | (_, None) => {
                format!("{} {} {} is disabled", target, name, item.name())
            },
            (value, Some(state)) => {
                format!("{} {} {} = {} is {}", target, name, item.name(), value, state)
            },
        };
        if should_log {
            match new_state {
                Some(LimitsState::Red | LimitsState::RedHigh | LimitsState::RedLow) => {
                    error!("{}", message)
                },
                Some(LimitsState::Yellow | LimitsState::YellowHigh | LimitsState::YellowLow) => {
                    warn!("{}", message)
                },
                _ => info!("{}", message),
            }
        }
        let time = packet
            .received_time()
            .and_then(|t| t.timestamp_nanos_opt())
            .unwrap_or_else(|| self.clock.now_nanos());
        let event = LimitsEventMessage::change(
            target,
            name,
            item.name(),
            old_state.map(|s| s.as_str().to_string()),
            new_state.map(|s| s.as_str().to_string()),
            time,
            message,
        );
        if let Err(e) = self.bus.publish_json(&self.topic, &event) {
            warn!("Unable to publish limits event: {}", e);
        }
    }
}

fn apply(packet: &mut Packet, raw: &PacketMessage, received_time: DateTime<Utc>) {
    packet.set_buffer(raw.buffer.clone());
    packet.set_received_time(Some(received_time));
    packet.set_received_count(raw.received_count);
    packet.stored = raw.stored;
}

pub struct DecomPipeline {
    keys: TopicKeys,
    bus: Arc<dyn Bus>,
    dictionary: Arc<Dictionary>,
    cvt: Arc<CurrentValueTable>,
    callback: Arc<dyn LimitsCallback>,
    cancel: CancelSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DecomPipeline {
    pub fn new(
        keys: TopicKeys,
        bus: Arc<dyn Bus>,
        dictionary: Arc<Dictionary>,
        cvt: Arc<CurrentValueTable>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let callback: Arc<dyn LimitsCallback> =
            Arc::new(LimitsPublisher::new(&keys, bus.clone(), clock));
        for packet in cvt.snapshot() {
            let (Some(target), Some(name)) = (packet.target_name(), packet.packet_name()) else {
                continue;
            };
            let result = cvt.modify(target, name, |p| {
                p.set_limits_change_callback(Some(Arc::clone(&callback)));
                p.update_limits_items_cache();
                Ok(())
            });
            if let Err(e) = result {
                warn!("Unable to attach limits callback to {} {}: {}", target, name, e);
            }
        }
        Self {
            keys,
            bus,
            dictionary,
            cvt,
            callback,
            cancel: CancelSignal::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn cvt(&self) -> &Arc<CurrentValueTable> {
        &self.cvt
    }

    /// Raw topics of every known telemetry packet plus UNKNOWN
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .dictionary
            .all_telemetry()
            .filter_map(|p| Some(self.keys.telemetry_raw(p.target_name()?, p.packet_name()?)))
            .collect();
        topics.push(self.keys.telemetry_raw(UNKNOWN, UNKNOWN));
        topics
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::latest(self.bus.clone(), &self.topics())
    }

    /// Decode one raw packet; returns the published JSON
    pub fn process(&self, raw: &PacketMessage) -> Result<serde_json::Value> {
        let target = raw.target_name.to_uppercase();
        let name = raw.packet_name.to_uppercase();
        let received_time = Utc.timestamp_nanos(raw.received_time);
        let limits_set = self.dictionary.limits_sets().current().to_string();

        if self.cvt.get(&target, &name).is_err() && target == UNKNOWN && name == UNKNOWN {
            let mut unknown = Packet::new(UNKNOWN, UNKNOWN, Endianness::BigEndian);
            unknown.set_limits_change_callback(Some(Arc::clone(&self.callback)));
            self.cvt.insert(unknown);
        }

        let json = if raw.stored {
            let mut detached = self.cvt.get(&target, &name)?.clone_live();
            detached.set_limits_change_callback(None);
            apply(&mut detached, raw, received_time);
            detached.as_decom_json()
        } else {
            self.cvt.modify(&target, &name, |p| {
                apply(p, raw, received_time);
                p.check_limits(&limits_set, false);
                Ok(p.as_decom_json())
            })?
        };

        self.bus
            .publish_json(&self.keys.telemetry_decoded(&target, &name), &json)?;
        Ok(json)
    }

    fn handle(&self, message: &Message) {
        let raw: PacketMessage = match message.json() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Decom: bad packet on {}: {}", message.topic, e);
                return;
            },
        };
        if let Err(e) = self.process(&raw) {
            error!(
                "Decom: {} {} failed: {}",
                raw.target_name, raw.packet_name, e
            );
        }
    }

    /// Process one batch; false once the bus is closed
    pub fn run_once(&self, subscription: &mut Subscription, timeout: Duration) -> bool {
        match subscription.poll(timeout) {
            Ok(messages) => {
                for message in &messages {
                    self.handle(message);
                }
                true
            },
            Err(BusError::Closed) => false,
            Err(e) => {
                warn!("Decom poll failed: {}", e);
                true
            },
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let mut subscription = self.subscribe();
        let pipeline = Arc::clone(self);
        *handle = Some(
            thread::Builder::new()
                .name("decom".to_string())
                .spawn(move || {
                    info!("Decom started on {} topics", pipeline.topics().len());
                    while !pipeline.cancel.is_cancelled()
                        && pipeline.run_once(&mut subscription, POLL_TIMEOUT)
                    {}
                    debug!("Decom stopped");
                })?,
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Decom thread panicked");
            }
        }
    }
}
