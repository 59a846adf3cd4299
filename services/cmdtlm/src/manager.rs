//! Connection manager for one interface or router
//!
//! The reader thread walks DISCONNECTED / ATTEMPTING / CONNECTED, connecting
//! under the link mutex so `stop` can never race an in-flight connect. A
//! second thread (see [`crate::handler`]) services directives for the same
//! link.

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{CmdTlmError, Result};
use crate::handler;
use crate::interface::{ConnectionState, RawPacket};
use crate::link::InterfaceLink;
use crate::reconnect::{ReconnectHelper, ReconnectPolicy};
use crate::status::InterfaceStatus;
use common::hex::encode_upper;
use common::CancelSignal;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use stellar_bus::{Bus, BusExt, PacketMessage, StatusStore, Subscription, TimeProvider, TopicKeys};
use stellar_packets::Dictionary;
use tracing::{debug, error, info, warn};

const IDLE_SLEEP: Duration = Duration::from_secs(1);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const UNKNOWN_BYTES_TO_PRINT: usize = 16;
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Interface,
    Router,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Interface => "INTERFACE",
            Role::Router => "ROUTER",
        }
    }

    pub(crate) fn status_key(&self, keys: &TopicKeys) -> String {
        match self {
            Role::Interface => keys.interface_status(),
            Role::Router => keys.router_status(),
        }
    }

    pub(crate) fn cmd_topic(&self, keys: &TopicKeys, name: &str) -> String {
        match self {
            Role::Interface => keys.interface_cmd(name),
            Role::Router => keys.router_cmd(name),
        }
    }

    pub(crate) fn ack_topic(&self, keys: &TopicKeys, name: &str) -> String {
        match self {
            Role::Interface => keys.interface_ack(name),
            Role::Router => keys.router_ack(name),
        }
    }
}

/// Collaborators shared by every manager of a service
#[derive(Clone)]
pub struct ManagerContext {
    pub keys: TopicKeys,
    pub bus: Arc<dyn Bus>,
    pub status: Arc<dyn StatusStore>,
    pub dictionary: Arc<Dictionary>,
    pub clock: Arc<dyn TimeProvider>,
    pub diagnostics: Arc<Diagnostics>,
}

/// Connect errors that are part of normal operation
pub fn is_common_connect_error(err: &CmdTlmError) -> bool {
    match err {
        CmdTlmError::Io(e) => {
            matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::Other
            ) || is_common_message(&e.to_string())
                || is_bad_socket(&e.to_string())
        },
        CmdTlmError::NotConnected(_) | CmdTlmError::TimeoutError(_) | CmdTlmError::Canceled(_) => {
            true
        },
        other => is_common_message(&other.to_string()),
    }
}

/// Lost-connection errors that are part of normal operation
pub fn is_common_lost_error(err: &CmdTlmError) -> bool {
    match err {
        CmdTlmError::Io(e) => {
            matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::Other
            ) || is_bad_socket(&e.to_string())
        },
        CmdTlmError::NotConnected(_) | CmdTlmError::TimeoutError(_) => true,
        _ => false,
    }
}

fn is_common_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("canceled") || message.contains("timeout")
}

/// ENOTSOCK and EBADF have no stable `ErrorKind`
fn is_bad_socket(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("non-socket") || message.contains("bad file descriptor")
}

pub(crate) struct ManagerCore {
    pub(crate) role: Role,
    pub(crate) link: Arc<InterfaceLink>,
    pub(crate) ctx: ManagerContext,
    pub(crate) targets: Vec<String>,
    /// Router only: target -> owning interface
    pub(crate) routes: BTreeMap<String, String>,
    pub(crate) cancel: CancelSignal,
    state: Mutex<ConnectionState>,
    error: Mutex<Option<String>>,
    link_mutex: Mutex<()>,
    reconnect: Mutex<ReconnectHelper>,
    tlm_counts: Mutex<HashMap<(String, String), u64>>,
    cmd_counts: Mutex<HashMap<(String, String), u64>>,
}

impl ManagerCore {
    pub(crate) fn name(&self) -> &str {
        self.link.name()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.write_status();
    }

    /// No-op once stopped so the removed record stays removed
    pub(crate) fn write_status(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let status = InterfaceStatus::capture(&self.link, self.state(), self.error.lock().clone());
        let key = self.role.status_key(&self.ctx.keys);
        if let Err(e) = status.write(self.ctx.status.as_ref(), &key) {
            warn!("{}: unable to write status: {}", self.name(), e);
        }
    }

    /// Ask the reader loop to (re)connect
    pub(crate) fn attempting(&self) {
        self.set_state(ConnectionState::Attempting);
    }

    /// One pass of the reader loop; false once cancelled
    pub(crate) fn run_once(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.state() {
            ConnectionState::Disconnected => {
                self.cancel.sleep(IDLE_SLEEP);
            },
            ConnectionState::Attempting => {
                let result = {
                    let _guard = self.link_mutex.lock();
                    if self.cancel.is_cancelled() {
                        return false;
                    }
                    self.connect()
                };
                if let Err(e) = result {
                    self.handle_connection_failed(e);
                }
            },
            ConnectionState::Connected => {
                if self.link.info().read_allowed {
                    match self.link.read() {
                        Ok(Some(packet)) => {
                            if let Err(e) = self.handle_packet(packet) {
                                error!("{}: Error handling packet: {}", self.name(), e);
                            }
                        },
                        Ok(None) => {
                            info!("{}: Internal disconnect requested (returned no data)", self.name());
                            self.handle_connection_lost(None);
                        },
                        Err(e) => self.handle_connection_lost(Some(e)),
                    }
                } else {
                    self.cancel.sleep(IDLE_SLEEP);
                    if !self.link.connected() {
                        self.handle_connection_lost(None);
                    }
                }
            },
        }
        !self.cancel.is_cancelled()
    }

    fn connect(&self) -> Result<()> {
        info!("{}: Connecting ...", self.name());
        self.reconnect.lock().record_attempt();
        self.link.connect()?;
        self.reconnect.lock().mark_connected();
        *self.error.lock() = None;
        self.set_state(ConnectionState::Connected);
        info!("{}: Connection Success", self.name());
        Ok(())
    }

    fn handle_connection_failed(&self, err: CmdTlmError) {
        let message = err.to_string();
        *self.error.lock() = Some(message.clone());
        self.reconnect.lock().record_failure();
        if is_common_connect_error(&err) {
            info!("{}: Connection Failed: {}", self.name(), message);
        } else {
            error!("{}: Connection Failed: {}", self.name(), message);
            self.ctx
                .diagnostics
                .record(DiagnosticKind::ConnectFailed, self.name(), &message);
        }
        self.disconnect(true);
    }

    fn handle_connection_lost(&self, err: Option<CmdTlmError>) {
        match err {
            Some(err) => {
                let message = err.to_string();
                *self.error.lock() = Some(message.clone());
                if is_common_lost_error(&err) {
                    info!("{}: Connection Lost: {}", self.name(), message);
                } else {
                    error!("{}: Connection Lost: {}", self.name(), message);
                    self.ctx
                        .diagnostics
                        .record(DiagnosticKind::ConnectionLost, self.name(), &message);
                }
            },
            None => info!("{}: Connection Lost", self.name()),
        }
        self.disconnect(true);
    }

    pub(crate) fn disconnect(&self, allow_reconnect: bool) {
        if self.state() == ConnectionState::Disconnected && !self.link.connected() {
            return;
        }
        let reconnect =
            allow_reconnect && self.link.info().auto_reconnect && self.state() != ConnectionState::Disconnected;
        if !reconnect {
            // before the link drops so the reader does not schedule a reconnect
            self.set_state(ConnectionState::Disconnected);
        }
        {
            let _guard = self.link_mutex.lock();
            if self.link.connected() {
                self.link.disconnect();
            }
        }
        if reconnect {
            self.attempting();
            if !self.cancel.is_cancelled() {
                let delay = self.reconnect.lock().next_delay();
                debug!("{}: reconnect delay {:?}", self.name(), delay);
                self.cancel.sleep(delay);
            }
        }
    }

    // ========== Packets ==========

    fn handle_packet(&self, packet: RawPacket) -> Result<()> {
        match self.role {
            Role::Interface => self.handle_telemetry(packet),
            Role::Router => self.route_command(packet),
        }
    }

    fn identify_tlm(&self, buffer: &[u8]) -> Option<(String, String)> {
        self.ctx
            .dictionary
            .identify_tlm(buffer, &self.targets)
            .map(packet_names)
    }

    fn handle_telemetry(&self, packet: RawPacket) -> Result<()> {
        self.write_status();
        let received_time = packet
            .received_time
            .and_then(|t| t.timestamp_nanos_opt())
            .unwrap_or_else(|| self.ctx.clock.now_nanos());

        let identified = if packet.stored {
            self.identify_tlm(&packet.buffer)
        } else {
            match (&packet.target_name, &packet.packet_name) {
                (Some(target), Some(name)) => match self.ctx.dictionary.telemetry(target, name) {
                    Ok(def) => Some(packet_names(def)),
                    Err(_) => {
                        warn!(
                            "{}: Received unknown identified telemetry: {} {}",
                            self.name(),
                            target,
                            name
                        );
                        self.identify_tlm(&packet.buffer)
                    },
                },
                _ => self.identify_tlm(&packet.buffer),
            }
        };

        let (target, name) = identified.unwrap_or_else(|| {
            let shown = packet.buffer.len().min(UNKNOWN_BYTES_TO_PRINT);
            warn!(
                "{} {} packet length: {} starting with: {}",
                self.name(),
                UNKNOWN,
                packet.buffer.len(),
                encode_upper(&packet.buffer[..shown])
            );
            (UNKNOWN.to_string(), UNKNOWN.to_string())
        });

        let received_count = bump(&self.tlm_counts, &target, &name);
        let message = PacketMessage {
            target_name: target.clone(),
            packet_name: name.clone(),
            received_time,
            received_count,
            stored: packet.stored,
            buffer: packet.buffer,
        };
        self.ctx
            .bus
            .publish_json(&self.ctx.keys.telemetry_raw(&target, &name), &message)?;
        Ok(())
    }

    fn route_command(&self, packet: RawPacket) -> Result<()> {
        let Some(command) = self.ctx.dictionary.identify_cmd(&packet.buffer, &self.targets) else {
            warn!(
                "{}: unknown command of {} bytes, not routed",
                self.name(),
                packet.buffer.len()
            );
            return Ok(());
        };
        let (target, name) = packet_names(command);
        let Some(interface) = self.routes.get(&target) else {
            warn!("{}: no interface for target {}, {} dropped", self.name(), target, name);
            return Ok(());
        };
        debug!("{}: routing {} {} to {}", self.name(), target, name, interface);
        handler::publish_directive(
            &self.ctx,
            interface,
            handler::InterfaceDirective::CommandBuffer {
                target_name: Some(target),
                buffer: packet.buffer,
            },
        )?;
        self.write_status();
        Ok(())
    }

    pub(crate) fn next_cmd_count(&self, target: &str, packet: &str) -> u64 {
        bump(&self.cmd_counts, target, packet)
    }

    pub(crate) fn tlm_count(&self, target: &str, packet: &str) -> u64 {
        self.tlm_counts
            .lock()
            .get(&(target.to_uppercase(), packet.to_uppercase()))
            .copied()
            .unwrap_or(0)
    }

    /// Cancel, disconnect and drop the status record
    pub(crate) fn stop(&self) {
        info!("{}: stop requested", self.name());
        let _guard = self.link_mutex.lock();
        self.cancel.cancel();
        self.link.disconnect();
        let key = self.role.status_key(&self.ctx.keys);
        if let Err(e) = InterfaceStatus::remove(self.ctx.status.as_ref(), &key, self.name()) {
            warn!("{}: unable to remove status: {}", self.name(), e);
        }
    }
}

fn packet_names(packet: &stellar_packets::Packet) -> (String, String) {
    (
        packet.target_name().unwrap_or(UNKNOWN).to_string(),
        packet.packet_name().unwrap_or(UNKNOWN).to_string(),
    )
}

fn bump(counts: &Mutex<HashMap<(String, String), u64>>, target: &str, packet: &str) -> u64 {
    let mut counts = counts.lock();
    let count = counts
        .entry((target.to_uppercase(), packet.to_uppercase()))
        .or_insert(0);
    *count += 1;
    *count
}

/// Reader loop plus directive handler for one link
pub struct ConnectionManager {
    core: Arc<ManagerCore>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn interface(link: InterfaceLink, ctx: ManagerContext) -> Self {
        Self::new(Role::Interface, link, ctx, BTreeMap::new())
    }

    /// `routes` maps each command target to the interface that owns it
    pub fn router(link: InterfaceLink, ctx: ManagerContext, routes: BTreeMap<String, String>) -> Self {
        Self::new(Role::Router, link, ctx, routes)
    }

    fn new(role: Role, link: InterfaceLink, ctx: ManagerContext, routes: BTreeMap<String, String>) -> Self {
        let info = link.info().clone();
        let state = if info.connect_on_startup {
            ConnectionState::Attempting
        } else {
            ConnectionState::Disconnected
        };
        let policy = ReconnectPolicy::fixed(Duration::from_secs_f64(info.reconnect_delay.max(0.0)));
        Self::with_policy(role, link, ctx, routes, state, policy)
    }

    fn with_policy(
        role: Role,
        link: InterfaceLink,
        ctx: ManagerContext,
        routes: BTreeMap<String, String>,
        state: ConnectionState,
        policy: ReconnectPolicy,
    ) -> Self {
        let targets = link.info().target_names.clone();
        let routes = routes
            .into_iter()
            .map(|(t, i)| (t.to_uppercase(), i.to_uppercase()))
            .collect();
        let core = Arc::new(ManagerCore {
            role,
            link: Arc::new(link),
            ctx,
            targets,
            routes,
            cancel: CancelSignal::new(),
            state: Mutex::new(state),
            error: Mutex::new(None),
            link_mutex: Mutex::new(()),
            reconnect: Mutex::new(ReconnectHelper::new(policy)),
            tlm_counts: Mutex::new(HashMap::new()),
            cmd_counts: Mutex::new(HashMap::new()),
        });
        core.write_status();
        Self {
            core,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Replace the fixed reconnect delay with a backoff policy
    pub fn with_reconnect_policy(self, policy: ReconnectPolicy) -> Self {
        *self.core.reconnect.lock() = ReconnectHelper::new(policy);
        self
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn role(&self) -> Role {
        self.core.role
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.core.error.lock().clone()
    }

    pub fn link(&self) -> &Arc<InterfaceLink> {
        &self.core.link
    }

    pub fn received_count(&self, target: &str, packet: &str) -> u64 {
        self.core.tlm_count(target, packet)
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.cancel.is_cancelled()
    }

    /// One reader-loop step on the calling thread
    pub fn run_once(&self) -> bool {
        self.core.run_once()
    }

    /// Request a connect; the reader loop performs it
    pub fn attempting(&self) {
        self.core.attempting();
    }

    pub fn disconnect(&self, allow_reconnect: bool) {
        self.core.disconnect(allow_reconnect);
    }

    /// Directive handling on the calling thread
    pub fn handle_directive(&self, directive: handler::InterfaceDirective) -> String {
        match self.core.role {
            Role::Interface => handler::handle_interface_directive(&self.core, directive),
            Role::Router => handler::handle_router_directive(&self.core, directive),
        }
    }

    /// Spawn the reader and handler threads
    pub fn start(&self) -> Result<()> {
        let name = self.name().to_string();
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Err(CmdTlmError::interface(format!("{} already started", name)));
        }

        // subscribe before spawning so no directive is missed
        let topics = handler::handler_topics(&self.core);
        let subscription = Subscription::latest(self.core.ctx.bus.clone(), &topics);
        let core = Arc::clone(&self.core);
        threads.push(
            thread::Builder::new()
                .name(format!("{}-handler", name.to_lowercase()))
                .spawn(move || handler::run_handler(core, subscription))?,
        );

        let core = Arc::clone(&self.core);
        threads.push(
            thread::Builder::new()
                .name(format!("{}-reader", name.to_lowercase()))
                .spawn(move || run_reader(core))?,
        );
        Ok(())
    }

    /// Stop both threads, waiting a bounded time for each
    pub fn stop(&self) {
        self.core.stop();
        let threads = std::mem::take(&mut *self.threads.lock());
        let deadline = Instant::now() + JOIN_TIMEOUT;
        for handle in threads {
            let thread_name = handle.thread().name().unwrap_or("?").to_string();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("{}: thread {} panicked", self.name(), thread_name);
                }
            } else {
                warn!("{}: thread {} did not stop in {:?}", self.name(), thread_name, JOIN_TIMEOUT);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if !self.threads.lock().is_empty() {
            self.stop();
        }
    }
}

fn run_reader(core: Arc<ManagerCore>) {
    if core.link.info().read_allowed {
        info!("{}: Starting packet reading", core.name());
    } else {
        info!("{}: Starting connection maintenance", core.name());
    }
    while core.run_once() {}
    core.write_status();
    info!("{}: Stopped packet reading", core.name());
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::handler::{InterfaceDirective, SUCCESS};
    use crate::interface::InterfaceInfo;
    use crate::sim::SimInterface;
    use crate::tcp::TcpClientInterface;
    use std::net::TcpListener;
    use std::path::Path;
    use stellar_bus::{MemoryBus, MemoryStatusStore, SystemTimeProvider};
    use tracing_test::traced_test;

    fn context(bus: &Arc<MemoryBus>, diagnostics_dir: &Path) -> ManagerContext {
        ManagerContext {
            keys: TopicKeys::default(),
            bus: bus.clone(),
            status: Arc::new(MemoryStatusStore::new()),
            dictionary: Arc::new(Dictionary::default()),
            clock: Arc::new(SystemTimeProvider),
            diagnostics: Arc::new(Diagnostics::new(Some(diagnostics_dir.to_path_buf()))),
        }
    }

    fn manager(
        info: InterfaceInfo,
        diagnostics_dir: &Path,
    ) -> (ConnectionManager, Arc<SimInterface>, Arc<MemoryBus>) {
        let sim = Arc::new(SimInterface::new(info, false));
        let bus = Arc::new(MemoryBus::new());
        let ctx = context(&bus, diagnostics_dir);
        let manager = ConnectionManager::interface(InterfaceLink::new(sim.clone()), ctx);
        (manager, sim, bus)
    }

    fn info() -> InterfaceInfo {
        let mut info = InterfaceInfo::new("INST_INT", &["INST"]);
        info.reconnect_delay = 0.0;
        info
    }

    fn artifacts(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    #[traced_test]
    fn test_refused_connect_is_quiet_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, sim, _bus) = manager(info(), dir.path());
        sim.fail_next_connect(io::ErrorKind::ConnectionRefused, "connection refused");

        assert!(manager.run_once());
        assert_eq!(manager.state(), ConnectionState::Attempting);
        assert_eq!(manager.last_error().as_deref(), Some("connection refused"));
        assert!(logs_contain("INST_INT: Connection Failed: connection refused"));
        assert!(!logs_contain("diagnostic written"));
        assert_eq!(artifacts(dir.path()), 0);

        assert!(manager.run_once());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(sim.connect_attempts(), 2);
        assert!(manager.last_error().is_none());
        assert!(logs_contain("INST_INT: Connection Success"));
    }

    #[test]
    #[traced_test]
    fn test_unexpected_connect_error_writes_one_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, sim, _bus) = manager(info(), dir.path());
        sim.fail_next_connect(io::ErrorKind::PermissionDenied, "permission denied");
        sim.fail_next_connect(io::ErrorKind::PermissionDenied, "permission denied");

        manager.run_once();
        manager.run_once();
        assert!(logs_contain("diagnostic written"));
        assert_eq!(artifacts(dir.path()), 1);
        assert_eq!(sim.connect_attempts(), 2);
        assert_eq!(manager.state(), ConnectionState::Attempting);
    }

    #[test]
    fn test_no_auto_reconnect_stays_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = info();
        info.auto_reconnect = false;
        let (manager, sim, _bus) = manager(info, dir.path());
        sim.fail_next_connect(io::ErrorKind::ConnectionRefused, "connection refused");

        manager.run_once();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(sim.connect_attempts(), 1);

        manager.attempting();
        manager.run_once();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    #[traced_test]
    fn test_unknown_packet_is_published_as_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, sim, bus) = manager(info(), dir.path());
        manager.run_once();
        sim.inject(RawPacket::new(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        sim.inject(RawPacket::new(vec![1]).identified("INST", "NOPE"));

        manager.run_once();
        assert!(logs_contain("INST_INT UNKNOWN packet length: 4 starting with: DEADBEEF"));
        manager.run_once();
        assert!(logs_contain("Received unknown identified telemetry: INST NOPE"));

        let messages = bus.messages("DEFAULT__TELEMETRY__UNKNOWN__UNKNOWN");
        assert_eq!(messages.len(), 2);
        let first: PacketMessage = messages[0].json().unwrap();
        assert_eq!(first.buffer, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(first.received_count, 1);
        assert_eq!(manager.received_count("UNKNOWN", "UNKNOWN"), 2);
    }

    #[test]
    fn test_peer_close_schedules_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, sim, _bus) = manager(info(), dir.path());
        manager.run_once();
        sim.close_peer();
        manager.run_once();
        assert_eq!(manager.state(), ConnectionState::Attempting);
        manager.run_once();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(sim.connect_attempts(), 2);
    }

    #[test]
    #[traced_test]
    fn test_lost_connection_error_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, sim, _bus) = manager(info(), dir.path());
        manager.run_once();
        sim.inject_error(io::ErrorKind::ConnectionReset, "connection reset by peer");
        manager.run_once();
        assert!(logs_contain("INST_INT: Connection Lost: connection reset by peer"));
        assert_eq!(artifacts(dir.path()), 0);

        manager.run_once();
        sim.inject_error(io::ErrorKind::InvalidData, "stream corrupted");
        manager.run_once();
        assert_eq!(artifacts(dir.path()), 1);
        assert_eq!(manager.state(), ConnectionState::Attempting);
    }

    #[test]
    #[traced_test]
    fn test_read_timeout_is_quiet_lost_connection() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let tcp = Arc::new(TcpClientInterface::new(
            info(),
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Some(Duration::from_millis(100)),
        ));
        let bus = Arc::new(MemoryBus::new());
        let manager =
            ConnectionManager::interface(InterfaceLink::new(tcp), context(&bus, dir.path()));

        manager.run_once();
        assert_eq!(manager.state(), ConnectionState::Connected);
        let (_peer, _) = listener.accept().unwrap();

        // idle peer, so the read times out
        manager.run_once();
        assert!(logs_contain("INST_INT: Connection Lost:"));
        assert!(logs_contain("read timeout after 100ms"));
        assert!(!logs_contain("diagnostic written"));
        assert_eq!(artifacts(dir.path()), 0);
        assert_eq!(manager.state(), ConnectionState::Attempting);
    }

    #[test]
    fn test_disconnect_and_connect_directives() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _sim, _bus) = manager(info(), dir.path());
        manager.run_once();
        assert_eq!(manager.handle_directive(InterfaceDirective::Connect), SUCCESS);
        assert_eq!(manager.state(), ConnectionState::Connected);

        assert_eq!(manager.handle_directive(InterfaceDirective::Disconnect), SUCCESS);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.link().connected());

        manager.handle_directive(InterfaceDirective::Connect);
        assert_eq!(manager.state(), ConnectionState::Attempting);
        manager.run_once();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_error_classification() {
        let refused = CmdTlmError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(is_common_connect_error(&refused));
        let denied = CmdTlmError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!is_common_connect_error(&denied));
        assert!(is_common_connect_error(&CmdTlmError::interface("connect canceled by user")));
        assert!(is_common_connect_error(&CmdTlmError::interface("read timeout")));

        let reset = CmdTlmError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(is_common_lost_error(&reset));
        assert!(is_common_lost_error(&CmdTlmError::from(io::Error::from(
            io::ErrorKind::BrokenPipe
        ))));
        assert!(is_common_lost_error(&CmdTlmError::from(io::Error::from(
            io::ErrorKind::WouldBlock
        ))));
        assert!(!is_common_lost_error(&CmdTlmError::protocol("bad sync")));
        let ebadf = CmdTlmError::from(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Bad file descriptor (os error 9)",
        ));
        assert!(is_common_lost_error(&ebadf));
        assert!(is_common_connect_error(&ebadf));
    }
}
