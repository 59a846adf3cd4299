//! In-process interface driven by injected events
//!
//! Used for loopback targets and for exercising the reader loop without a
//! socket. With `loopback` set, every write is delivered back as a read.

use crate::error::{CmdTlmError, Result};
use crate::interface::{Interface, InterfaceInfo, InterfaceStats, RawPacket, ReadResult};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum SimEvent {
    Data(RawPacket),
    Error(io::ErrorKind, String),
    Close,
}

pub struct SimInterface {
    info: InterfaceInfo,
    stats: InterfaceStats,
    loopback: bool,
    connected: AtomicBool,
    connect_attempts: AtomicU64,
    connect_faults: Mutex<VecDeque<(io::ErrorKind, String)>>,
    written: Mutex<Vec<Vec<u8>>>,
    events: (Sender<SimEvent>, Receiver<SimEvent>),
}

impl SimInterface {
    pub fn new(info: InterfaceInfo, loopback: bool) -> Self {
        Self {
            info,
            stats: InterfaceStats::default(),
            loopback,
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            connect_faults: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            events: unbounded(),
        }
    }

    /// Deliver a packet to the next read
    pub fn inject(&self, packet: RawPacket) {
        let _ = self.events.0.send(SimEvent::Data(packet));
    }

    /// Fail the next read with an I/O error
    pub fn inject_error(&self, kind: io::ErrorKind, message: &str) {
        let _ = self.events.0.send(SimEvent::Error(kind, message.to_string()));
    }

    /// Simulate the peer closing the connection
    pub fn close_peer(&self) {
        let _ = self.events.0.send(SimEvent::Close);
    }

    /// Fail the next connect attempt; faults queue up in order
    pub fn fail_next_connect(&self, kind: io::ErrorKind, message: &str) {
        self.connect_faults
            .lock()
            .push_back((kind, message.to_string()));
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }
}

impl Interface for SimInterface {
    fn info(&self) -> &InterfaceInfo {
        &self.info
    }

    fn stats(&self) -> &InterfaceStats {
        &self.stats
    }

    fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some((kind, message)) = self.connect_faults.lock().pop_front() {
            return Err(io::Error::new(kind, message).into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn read_interface(&self) -> Result<ReadResult> {
        loop {
            if !self.connected() {
                return Ok(ReadResult::NoData);
            }
            match self.events.1.recv_timeout(POLL_INTERVAL) {
                Ok(SimEvent::Data(packet)) => return Ok(ReadResult::Data(packet)),
                Ok(SimEvent::Error(kind, message)) => {
                    return Err(io::Error::new(kind, message).into())
                },
                Ok(SimEvent::Close) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(ReadResult::NoData);
                },
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(ReadResult::NoData),
            }
        }
    }

    fn write_interface(&self, data: &[u8]) -> Result<()> {
        if !self.connected() {
            return Err(CmdTlmError::NotConnected(self.info.name.clone()));
        }
        self.written.lock().push(data.to_vec());
        if self.loopback {
            self.inject(RawPacket::new(data.to_vec()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_loopback_and_close() {
        let sim = SimInterface::new(InterfaceInfo::new("sim_int", &["inst"]), true);
        assert!(sim.write_interface(&[1]).is_err());
        sim.connect().unwrap();
        sim.write_interface(&[1, 2]).unwrap();
        assert_eq!(
            sim.read_interface().unwrap(),
            ReadResult::Data(RawPacket::new(vec![1, 2]))
        );
        sim.close_peer();
        assert_eq!(sim.read_interface().unwrap(), ReadResult::NoData);
        assert!(!sim.connected());
    }

    #[test]
    fn test_connect_faults_in_order() {
        let sim = SimInterface::new(InterfaceInfo::new("SIM_INT", &[]), false);
        sim.fail_next_connect(io::ErrorKind::ConnectionRefused, "Connection refused");
        let err = sim.connect().unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
        sim.connect().unwrap();
        assert_eq!(sim.connect_attempts(), 2);
    }
}
