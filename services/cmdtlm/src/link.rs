//! An interface together with its protocol chains and raw loggers

use crate::error::{CmdTlmError, Result};
use crate::interface::{Interface, InterfaceInfo, InterfaceStats, RawPacket, ReadResult};
use crate::protocols::{Protocol, ProtocolConfig, ProtocolResult};
use crate::raw_logger::RawLogger;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

pub struct InterfaceLink {
    interface: Arc<dyn Interface>,
    read_protocols: Mutex<Vec<Box<dyn Protocol>>>,
    write_protocols: Mutex<Vec<Box<dyn Protocol>>>,
    raw_loggers: Option<(RawLogger, RawLogger)>,
}

impl InterfaceLink {
    pub fn new(interface: Arc<dyn Interface>) -> Self {
        Self {
            interface,
            read_protocols: Mutex::new(Vec::new()),
            write_protocols: Mutex::new(Vec::new()),
            raw_loggers: None,
        }
    }

    /// Build an independent read and write chain from each config
    pub fn with_protocols(self, configs: &[ProtocolConfig]) -> Result<Self> {
        let mut read = Vec::with_capacity(configs.len());
        let mut write = Vec::with_capacity(configs.len());
        for config in configs {
            read.push(config.build()?);
            write.push(config.build()?);
        }
        *self.read_protocols.lock() = read;
        *self.write_protocols.lock() = write;
        Ok(self)
    }

    pub fn with_raw_logging(mut self, dir: impl AsRef<Path>) -> Self {
        self.raw_loggers = Some(RawLogger::pair(&self.interface.info().name, dir));
        self
    }

    pub fn interface(&self) -> &Arc<dyn Interface> {
        &self.interface
    }

    pub fn info(&self) -> &InterfaceInfo {
        self.interface.info()
    }

    pub fn name(&self) -> &str {
        &self.interface.info().name
    }

    pub fn stats(&self) -> &InterfaceStats {
        self.interface.stats()
    }

    pub fn connected(&self) -> bool {
        self.interface.connected()
    }

    pub fn connect(&self) -> Result<()> {
        self.interface.connect()?;
        for protocol in self.read_protocols.lock().iter_mut() {
            protocol.reset();
        }
        for protocol in self.write_protocols.lock().iter_mut() {
            protocol.reset();
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        self.interface.disconnect();
    }

    /// Next complete packet, or `None` when the connection is closing
    pub fn read(&self) -> Result<Option<RawPacket>> {
        // a chain may already hold a complete packet from the last read
        let mut drain_first = !self.read_protocols.lock().is_empty();
        loop {
            let mut packet = if drain_first {
                drain_first = false;
                RawPacket::new(Vec::new())
            } else {
                match self.interface.read_interface()? {
                    ReadResult::NoData => return Ok(None),
                    ReadResult::Data(packet) => {
                        self.stats()
                            .bytes_read
                            .fetch_add(packet.buffer.len() as u64, Ordering::Relaxed);
                        if let Some((read_log, _)) = &self.raw_loggers {
                            read_log.write(&packet.buffer);
                        }
                        packet
                    },
                }
            };

            let mut complete = true;
            for protocol in self.read_protocols.lock().iter_mut() {
                match protocol.read_data(&packet.buffer)? {
                    ProtocolResult::Data(data) => packet.buffer = data,
                    ProtocolResult::Stop => {
                        complete = false;
                        break;
                    },
                    ProtocolResult::Disconnect => {
                        debug!("{}: {} protocol requested disconnect", self.name(), protocol.name());
                        return Ok(None);
                    },
                }
            }
            if complete {
                self.stats().read_count.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(packet));
            }
        }
    }

    /// Frame through the write chain (in reverse) and send
    pub fn write(&self, data: Vec<u8>) -> Result<()> {
        if !self.info().write_allowed {
            return Err(CmdTlmError::interface(format!(
                "Interface {} does not allow writes",
                self.name()
            )));
        }
        if !self.connected() {
            return Err(CmdTlmError::NotConnected(self.name().to_string()));
        }
        let mut protocols = self.write_protocols.lock();
        let mut data = data;
        for protocol in protocols.iter_mut().rev() {
            match protocol.write_data(data)? {
                ProtocolResult::Data(framed) => data = framed,
                ProtocolResult::Stop => return Ok(()),
                ProtocolResult::Disconnect => {
                    drop(protocols);
                    self.disconnect();
                    return Err(CmdTlmError::NotConnected(self.name().to_string()));
                },
            }
        }
        self.send(&data)
    }

    /// Send bytes untouched by the protocol chain
    pub fn write_raw(&self, data: &[u8]) -> Result<()> {
        if !self.info().write_raw_allowed {
            return Err(CmdTlmError::interface(format!(
                "Interface {} does not allow raw writes",
                self.name()
            )));
        }
        if !self.connected() {
            return Err(CmdTlmError::NotConnected(self.name().to_string()));
        }
        let _guard = self.write_protocols.lock();
        self.send(data)
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        self.interface.write_interface(data)?;
        self.stats().record_write(data.len());
        if let Some((_, write_log)) = &self.raw_loggers {
            write_log.write(data);
        }
        Ok(())
    }

    pub fn start_raw_logging(&self) -> Result<()> {
        match &self.raw_loggers {
            Some((read_log, write_log)) => {
                read_log.start()?;
                write_log.start()
            },
            None => Err(CmdTlmError::interface(format!(
                "Interface {} has no raw log directory",
                self.name()
            ))),
        }
    }

    pub fn stop_raw_logging(&self) {
        if let Some((read_log, write_log)) = &self.raw_loggers {
            read_log.stop();
            write_log.stop();
        }
    }

    pub fn raw_logging(&self) -> bool {
        self.raw_loggers
            .as_ref()
            .is_some_and(|(read_log, _)| read_log.logging_enabled())
    }
}
